//! Configuration for benchmark runs.

use std::path::PathBuf;

use crate::error::BenchError;

/// Default model evaluated when none is given.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default root under which bare corpus names are resolved.
pub const DEFAULT_BENCHMARK_ROOT: &str = "tmp.benchmark";

/// Name of the pristine exercise set under the benchmark root.
pub const PRISTINE_DIR_NAME: &str = "practice";

/// Configuration shared by every exercise of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Model identifier handed to the agent.
    pub model: String,
    /// Edit format handed to the agent (already resolved).
    pub edit_format: String,
    /// Maximum number of agent attempts per exercise.
    pub max_attempts: usize,
    /// Skip sandbox execution entirely (agent edits only).
    pub no_unit_tests: bool,
    /// Verbose agent output.
    pub verbose: bool,
    /// Number of exercises processed concurrently.
    pub threads: usize,
    /// Identifier of the harness build that produced the records.
    pub commit_hash: String,
    /// Directory holding the pristine exercise set.
    pub pristine_dir: PathBuf,
}

impl BenchConfig {
    /// Creates a configuration for `model` with defaults for everything else.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let edit_format = default_edit_format(&model).to_string();
        Self {
            model,
            edit_format,
            max_attempts: 2,
            no_unit_tests: false,
            verbose: false,
            threads: 1,
            commit_hash: "unknown".to_string(),
            pristine_dir: PathBuf::from(DEFAULT_BENCHMARK_ROOT).join(PRISTINE_DIR_NAME),
        }
    }

    /// Overrides the model's default edit format.
    pub fn with_edit_format(mut self, edit_format: impl Into<String>) -> Self {
        self.edit_format = edit_format.into();
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Disables unit-test execution (dry run).
    pub fn without_unit_tests(mut self) -> Self {
        self.no_unit_tests = true;
        self
    }

    /// Enables verbose agent output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the concurrency degree.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the run/commit identifier stored in every record.
    pub fn with_commit_hash(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = commit_hash.into();
        self
    }

    /// Sets the pristine exercise directory.
    pub fn with_pristine_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pristine_dir = dir.into();
        self
    }

    /// Checks the invariants the runner relies on.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.max_attempts == 0 {
            return Err(BenchError::InvalidConfig(
                "attempt budget must be at least 1".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(BenchError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

/// Edit format a model uses unless overridden.
///
/// GPT-4 class models handle search/replace diffs; everything else gets
/// whole-file edits.
pub fn default_edit_format(model: &str) -> &'static str {
    if model.starts_with("gpt-4") {
        "diff"
    } else {
        "whole"
    }
}
