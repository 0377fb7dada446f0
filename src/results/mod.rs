//! Per-exercise outcome records.
//!
//! Each exercise directory holds at most one `.bench.results.json`. Its
//! presence (and successful parse) is the only completion marker: the
//! runner skips exercises that have one, and the aggregator reads them.
//! Records are written through a temp file in the same directory and then
//! renamed into place, so a concurrent reader never sees a partial record.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;

/// Fixed name of the outcome record inside an exercise directory.
pub const RESULTS_FILE: &str = ".bench.results.json";

/// Fixed name of the per-exercise transcript (agent chat + test output).
pub const HISTORY_FILE: &str = ".bench.chat.history.md";

/// Terminal, persisted result of evaluating one exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Exercise directory the record was produced in.
    pub testdir: PathBuf,
    /// Exercise identifier (directory name).
    pub testcase: String,
    pub model: String,
    pub edit_format: String,
    /// Outcome of attempt `i`: whether all hidden tests passed after it.
    pub tests_outcomes: Vec<bool>,
    /// Total agent cost across all attempts, in dollars.
    pub cost: f64,
    /// Total agent wall-clock time across all attempts, in seconds.
    pub duration: f64,
    pub commit_hash: String,
    #[serde(default)]
    pub num_error_outputs: u64,
    #[serde(default)]
    pub num_user_asks: u64,
}

impl OutcomeRecord {
    /// True if the final attempt passed.
    pub fn passed(&self) -> bool {
        self.tests_outcomes.last().copied().unwrap_or(false)
    }

    /// Index of the passing attempt, if any.
    pub fn passing_attempt(&self) -> Option<usize> {
        if self.passed() {
            Some(self.tests_outcomes.len() - 1)
        } else {
            None
        }
    }
}

/// What the store found for one exercise.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    /// No record on disk.
    Missing,
    /// A record that parsed.
    Valid(OutcomeRecord),
    /// A record exists but failed to parse.
    Malformed(String),
}

/// Path of the record file for an exercise directory.
pub fn record_path(exercise_dir: &Path) -> PathBuf {
    exercise_dir.join(RESULTS_FILE)
}

/// Path of the transcript file for an exercise directory.
pub fn history_path(exercise_dir: &Path) -> PathBuf {
    exercise_dir.join(HISTORY_FILE)
}

/// Reads the record of one exercise.
///
/// A record that vanishes between a directory listing and this read is
/// reported as [`StoredRecord::Missing`].
pub fn load(exercise_dir: &Path) -> StoredRecord {
    let path = record_path(exercise_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return StoredRecord::Missing,
        Err(e) => return StoredRecord::Malformed(format!("{}: {}", path.display(), e)),
    };
    match serde_json::from_str::<OutcomeRecord>(&content) {
        Ok(record) => StoredRecord::Valid(record),
        Err(e) => StoredRecord::Malformed(format!("{}: {}", path.display(), e)),
    }
}

/// Persists a record atomically, replacing any previous file.
pub fn save(exercise_dir: &Path, record: &OutcomeRecord) -> Result<PathBuf, StoreError> {
    let path = record_path(exercise_dir);
    let json = serde_json::to_string_pretty(record)?;

    let mut tmp = NamedTempFile::new_in(exercise_dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| StoreError::Persist {
        path: path.clone(),
        source: e.error,
    })?;

    debug!("Saved outcome record to {}", path.display());
    Ok(path)
}
