//! Per-exercise evaluation.
//!
//! The [`ExerciseRunner`] takes one exercise from "nothing done" to a
//! persisted [`OutcomeRecord`]:
//!
//! 1. Return the stored record if one already parses (idempotent re-runs)
//! 2. Restore the editable stubs from the pristine corpus
//! 3. Give the agent the instructions, run the hidden tests in the sandbox
//! 4. On failure, feed the first lines of test output back and retry
//! 5. Persist the record once the attempts pass or run out
//!
//! Operator interruption is not an error: it comes back as
//! [`ExerciseOutcome::Interrupted`] and trips the shared
//! [`CancellationSignal`] so the scheduler stops the whole run.

pub mod state;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::agent::{CoderFactory, CoderSession};
use crate::config::BenchConfig;
use crate::corpus::Exercise;
use crate::results::{self, OutcomeRecord, StoredRecord};
use crate::sandbox::SandboxExecutor;

pub use state::AttemptState;

/// Lines of test output fed back to the agent after a failure.
pub const FEEDBACK_LINES: usize = 50;

/// Run-wide stop flag, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the whole run stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the evaluation of one exercise ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExerciseOutcome {
    /// Evaluated during this run; the record was persisted.
    Completed(OutcomeRecord),
    /// A valid record already existed; nothing was executed.
    AlreadyDone(OutcomeRecord),
    /// Unit tests are disabled; the agent ran once and nothing was recorded.
    DryRun { exercise: String },
    /// The exercise could not be evaluated; the run continues.
    Skipped { exercise: String, reason: String },
    /// The operator interrupted the agent; the run must stop.
    Interrupted { exercise: String },
}

impl ExerciseOutcome {
    /// Name of the exercise this outcome belongs to.
    pub fn exercise(&self) -> &str {
        match self {
            Self::Completed(r) | Self::AlreadyDone(r) => &r.testcase,
            Self::DryRun { exercise }
            | Self::Skipped { exercise, .. }
            | Self::Interrupted { exercise } => exercise,
        }
    }

    /// The outcome record, if the exercise has one.
    pub fn record(&self) -> Option<&OutcomeRecord> {
        match self {
            Self::Completed(r) | Self::AlreadyDone(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Running totals over an exercise's attempts.
#[derive(Debug, Default)]
struct Tally {
    outcomes: Vec<bool>,
    cost: f64,
    duration: f64,
    error_outputs: u64,
    user_asks: u64,
}

/// Evaluates single exercises with a fixed model, edit format and sandbox.
pub struct ExerciseRunner {
    config: BenchConfig,
    coders: Arc<dyn CoderFactory>,
    sandbox: SandboxExecutor,
}

impl ExerciseRunner {
    pub fn new(config: BenchConfig, coders: Arc<dyn CoderFactory>, sandbox: SandboxExecutor) -> Self {
        Self {
            config,
            coders,
            sandbox,
        }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Evaluates the exercise in `exercise_dir`.
    pub async fn run(&self, exercise_dir: &Path, cancel: &CancellationSignal) -> ExerciseOutcome {
        let name = exercise_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| exercise_dir.display().to_string());

        if !exercise_dir.is_dir() {
            return skipped(name, format!("not a directory: {}", exercise_dir.display()));
        }

        match results::load(exercise_dir) {
            StoredRecord::Valid(record) => {
                debug!(exercise = %name, "Outcome record exists, skipping");
                return ExerciseOutcome::AlreadyDone(record);
            }
            StoredRecord::Malformed(reason) => {
                warn!(exercise = %name, "Outcome record failed to parse, re-running: {}", reason);
            }
            StoredRecord::Missing => {}
        }

        let exercise = match Exercise::load(exercise_dir) {
            Ok(exercise) => exercise,
            Err(e) => return skipped(name, e.to_string()),
        };
        if let Err(e) = exercise.reset_editable_files(&self.config.pristine_dir) {
            return skipped(name, e.to_string());
        }

        let session = CoderSession {
            model: self.config.model.clone(),
            edit_format: self.config.edit_format.clone(),
            verbose: self.config.verbose,
            history_file: results::history_path(&exercise.dir),
        };
        let mut coder = match self.coders.create(&exercise, &session) {
            Ok(coder) => coder,
            Err(e) => return skipped(name, e.to_string()),
        };
        info!(exercise = %name, files = %exercise.file_list(), "Starting exercise");

        let max_attempts = self.config.max_attempts;
        let mut instructions = initial_instructions(&exercise);
        let mut tally = Tally::default();
        let mut state = AttemptState::Pending.next_attempt(max_attempts);

        while !state.is_terminal() {
            let AttemptState::Attempting(attempt) = state else {
                state = state.next_attempt(max_attempts);
                continue;
            };

            if cancel.is_cancelled() {
                return ExerciseOutcome::Interrupted { exercise: name };
            }

            let start = Instant::now();
            let turn = match coder.run(&instructions).await {
                Ok(turn) => turn,
                Err(e) => return skipped(name, e.to_string()),
            };
            tally.duration += start.elapsed().as_secs_f64();
            tally.cost += turn.cost;
            tally.error_outputs += turn.error_outputs;
            tally.user_asks += turn.user_asks;

            if turn.interrupted {
                warn!(exercise = %name, attempt, "Agent interrupted by operator, stopping run");
                cancel.cancel();
                return ExerciseOutcome::Interrupted { exercise: name };
            }

            if self.config.no_unit_tests {
                return ExerciseOutcome::DryRun { exercise: name };
            }

            let run = match self.sandbox.execute(&exercise).await {
                Ok(run) => run,
                Err(e) => return skipped(name, e.to_string()),
            };
            // A run cut short by the operator says nothing about the edits.
            if cancel.is_cancelled() {
                warn!(exercise = %name, attempt, "Run cancelled during tests, discarding attempt");
                return ExerciseOutcome::Interrupted { exercise: name };
            }
            tally.outcomes.push(run.passed);

            if !run.passed {
                if let Some(last) = run.output.lines().last() {
                    info!(exercise = %name, attempt, "{}", last);
                }
                instructions = feedback_instructions(&run.output, &exercise.file_list());
            }
            state = state.after_attempt(run.passed, max_attempts);
        }

        let record = OutcomeRecord {
            testdir: exercise.dir.clone(),
            testcase: exercise.name.clone(),
            model: self.config.model.clone(),
            edit_format: self.config.edit_format.clone(),
            tests_outcomes: tally.outcomes,
            cost: tally.cost,
            duration: tally.duration,
            commit_hash: self.config.commit_hash.clone(),
            num_error_outputs: tally.error_outputs,
            num_user_asks: tally.user_asks,
        };

        if let Err(e) = results::save(&exercise.dir, &record) {
            return skipped(name, e.to_string());
        }
        info!(
            exercise = %name,
            passed = record.passed(),
            attempts = record.tests_outcomes.len(),
            cost = record.cost,
            "Exercise finished"
        );
        ExerciseOutcome::Completed(record)
    }
}

fn skipped(exercise: String, reason: String) -> ExerciseOutcome {
    warn!(exercise = %exercise, "Skipping exercise: {}", reason);
    ExerciseOutcome::Skipped { exercise, reason }
}

/// Instructions for the first attempt.
pub fn initial_instructions(exercise: &Exercise) -> String {
    format!(
        "{}\n=====\n\
         Use the above instructions to modify the supplied files: {}\n\
         Keep and implement the existing function or class stubs, they will be called from unit tests.\n\
         Only use standard python libraries, don't suggest installing any packages.\n",
        exercise.instructions,
        exercise.file_list()
    )
}

/// Instructions for a retry: the head of the failing output plus a fix request.
pub fn feedback_instructions(test_output: &str, file_list: &str) -> String {
    let head: Vec<&str> = test_output.lines().take(FEEDBACK_LINES).collect();
    format!(
        "{}\n\n####\n\nFix the code in {} to resolve the test failures above.",
        head.join("\n"),
        file_list
    )
}
