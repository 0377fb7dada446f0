//! Corpus-wide statistics over the persisted outcome records.
//!
//! The aggregator only reads. It tolerates records appearing or vanishing
//! while it scans, so it can run next to a live benchmark.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::results::{self, OutcomeRecord, StoredRecord};

/// Record fields that must hold a single value across one corpus.
pub const VARIANT_FIELDS: [&str; 3] = ["model", "edit_format", "commit_hash"];

/// Aggregate of every valid outcome record in a corpus directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusStats {
    pub corpus_dir: PathBuf,
    /// Exercise directories on disk.
    pub total_exercises: usize,
    /// Exercises with a valid outcome record.
    pub completed: usize,
    /// Records that failed to parse and were ignored.
    pub malformed: usize,
    /// Longest attempt sequence observed.
    pub retry_depth: usize,
    /// `passed_by_attempt[i]`: exercises passing at or before attempt `i`.
    pub passed_by_attempt: Vec<usize>,
    pub total_cost: f64,
    pub avg_cost: f64,
    /// Average cost extrapolated to the whole corpus.
    pub projected_cost: f64,
    pub total_duration: f64,
    pub avg_duration: f64,
    /// Seconds still needed for the exercises without a record.
    pub projected_remaining: f64,
    pub error_outputs: u64,
    pub user_asks: u64,
    /// Distinct values seen per entry of [`VARIANT_FIELDS`].
    pub variants: BTreeMap<String, BTreeSet<String>>,
}

impl CorpusStats {
    /// Builds the aggregate from already-loaded records.
    pub fn from_records(
        corpus_dir: impl Into<PathBuf>,
        total_exercises: usize,
        records: &[OutcomeRecord],
    ) -> Self {
        let mut stats = Self {
            corpus_dir: corpus_dir.into(),
            total_exercises,
            completed: records.len(),
            ..Self::default()
        };
        for field in VARIANT_FIELDS {
            stats.variants.insert(field.to_string(), BTreeSet::new());
        }

        stats.retry_depth = records
            .iter()
            .map(|r| r.tests_outcomes.len())
            .max()
            .unwrap_or(0);
        stats.passed_by_attempt = vec![0; stats.retry_depth];

        for record in records {
            if let Some(first_pass) = record.passing_attempt() {
                for count in &mut stats.passed_by_attempt[first_pass..] {
                    *count += 1;
                }
            }
            stats.total_cost += record.cost;
            stats.total_duration += record.duration;
            stats.error_outputs += record.num_error_outputs;
            stats.user_asks += record.num_user_asks;

            for (field, value) in [
                ("model", &record.model),
                ("edit_format", &record.edit_format),
                ("commit_hash", &record.commit_hash),
            ] {
                stats
                    .variants
                    .entry(field.to_string())
                    .or_default()
                    .insert(value.clone());
            }
        }

        if stats.completed > 0 {
            let completed = stats.completed as f64;
            stats.avg_cost = stats.total_cost / completed;
            stats.avg_duration = stats.total_duration / completed;
            stats.projected_cost = stats.avg_cost * total_exercises as f64;
            let remaining = total_exercises.saturating_sub(stats.completed);
            stats.projected_remaining = stats.avg_duration * remaining as f64;
        }
        stats
    }

    /// Cumulative pass rate in percent after attempt `attempt`.
    pub fn pass_rate(&self, attempt: usize) -> Option<f64> {
        if self.completed == 0 {
            return None;
        }
        self.passed_by_attempt
            .get(attempt)
            .map(|&passed| 100.0 * passed as f64 / self.completed as f64)
    }

    /// Variant fields with more than one distinct value.
    pub fn inconsistent_fields(&self) -> Vec<&str> {
        self.variants
            .iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(field, _)| field.as_str())
            .collect()
    }
}

/// Scans `corpus_dir` and aggregates every valid outcome record.
pub fn summarize(corpus_dir: &Path) -> io::Result<CorpusStats> {
    let mut total = 0;
    let mut malformed = 0;
    let mut records = Vec::new();

    for entry in fs::read_dir(corpus_dir)? {
        // Entries can vanish mid-scan when an archive or clean runs alongside.
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        total += 1;

        match results::load(&entry.path()) {
            StoredRecord::Valid(record) => records.push(record),
            StoredRecord::Missing => {}
            StoredRecord::Malformed(reason) => {
                warn!(exercise = %entry.path().display(), "Ignoring malformed outcome record: {}", reason);
                malformed += 1;
            }
        }
    }

    let mut stats = CorpusStats::from_records(corpus_dir, total, &records);
    stats.malformed = malformed;
    Ok(stats)
}

impl fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── {} ──", self.corpus_dir.display())?;
        if self.completed == 0 {
            return writeln!(
                f,
                "no completed test-cases ({} exercises on disk)",
                self.total_exercises
            );
        }

        writeln!(f, "test-cases: {}", self.completed)?;
        for (field, values) in &self.variants {
            let joined = values.iter().cloned().collect::<Vec<_>>().join(", ");
            if values.len() > 1 {
                writeln!(f, "{field}: {joined} (inconsistent)")?;
            } else {
                writeln!(f, "{field}: {joined}")?;
            }
        }
        writeln!(f, "num_error_outputs: {}", self.error_outputs)?;
        writeln!(f, "num_user_asks: {}", self.user_asks)?;
        if self.malformed > 0 {
            writeln!(f, "malformed records: {}", self.malformed)?;
        }
        writeln!(f)?;

        for attempt in 0..self.retry_depth {
            if let Some(rate) = self.pass_rate(attempt) {
                writeln!(f, "{rate:.1}% correct after try {attempt}")?;
            }
        }
        writeln!(f)?;

        let remaining = self.projected_remaining.round() as u64;
        writeln!(
            f,
            "duration: {:.1} sec/test-case, {:2}:{:02} remaining",
            self.avg_duration,
            remaining / 60,
            remaining % 60
        )?;
        writeln!(
            f,
            "costs: ${:.4}/test-case, ${:.2} total, ${:.2} projected",
            self.avg_cost, self.total_cost, self.projected_cost
        )
    }
}
