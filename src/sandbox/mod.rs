//! Sandboxed execution of hidden unit tests.
//!
//! The [`SandboxExecutor`] runs an exercise's hidden test files one at a
//! time through a [`TestLauncher`] (Docker in production) and stops at the
//! first file that fails or times out. Every file's output is appended to
//! the exercise transcript regardless of the result.

pub mod docker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::corpus::Exercise;
use crate::error::SandboxError;
use crate::results::history_path;

pub use docker::{DockerLauncher, ImageStatus, SandboxImage};

/// Configuration for the test sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image the tests run in.
    pub image: String,
    /// Build recipe used when the image is absent.
    pub dockerfile: PathBuf,
    /// Per-test-file timeout.
    pub timeout: Duration,
    /// Memory limit in MB.
    pub memory_limit_mb: u64,
    /// CPU limit (number of cores, 0 = unlimited).
    pub cpu_limit: f64,
    /// Network mode ("none" isolates the tests).
    pub network_mode: String,
    /// Command run inside the container; `{file}` is replaced by the test file name.
    pub test_command: String,
}

impl SandboxConfig {
    /// Creates a sandbox configuration for `image` with defaults.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            dockerfile: PathBuf::from("benchmark/Dockerfile"),
            timeout: Duration::from_secs(60),
            memory_limit_mb: 2048,
            cpu_limit: 1.0,
            network_mode: "none".to_string(),
            test_command: "pytest /app/{file}".to_string(),
        }
    }

    /// Sets the build recipe.
    pub fn with_dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.dockerfile = path.into();
        self
    }

    /// Sets the per-file timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the memory limit in MB.
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    /// Sets the CPU limit.
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = cores;
        self
    }

    /// Sets the in-container test command template.
    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = command.into();
        self
    }

    /// Renders the test command for one hidden test file.
    pub fn command_for(&self, test_file: &str) -> String {
        self.test_command.replace("{file}", test_file)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new("benchmark")
    }
}

/// Result of launching a single hidden test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRun {
    Passed(String),
    Failed(String),
    TimedOut,
}

/// Runs one hidden test file of an exercise in isolation.
#[async_trait]
pub trait TestLauncher: Send + Sync {
    /// Runs `test_file` against the exercise's current files.
    ///
    /// Must give up after `timeout` and report [`FileRun::TimedOut`].
    async fn launch(&self, exercise: &Exercise, test_file: &str, timeout: Duration) -> FileRun;
}

/// Outcome of running an exercise's hidden tests once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// True if every hidden test file passed.
    pub passed: bool,
    /// Output of the last file run (the failing one on failure).
    pub output: String,
    /// Test files actually launched, in order.
    pub files_run: Vec<String>,
}

/// Fail-fast hidden test runner.
#[derive(Clone)]
pub struct SandboxExecutor {
    launcher: Arc<dyn TestLauncher>,
    timeout: Duration,
}

impl SandboxExecutor {
    /// Creates an executor over `launcher` with a per-file timeout.
    pub fn new(launcher: Arc<dyn TestLauncher>, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }

    /// Runs the hidden tests, stopping at the first failing or timed-out file.
    pub async fn execute(&self, exercise: &Exercise) -> Result<TestRun, SandboxError> {
        let mut files_run = Vec::new();
        let mut output = String::new();

        for test_file in &exercise.test_files {
            debug!(exercise = %exercise.name, file = %test_file, "Running hidden tests");
            files_run.push(test_file.clone());

            let (passed, text) = match self.launcher.launch(exercise, test_file, self.timeout).await {
                FileRun::Passed(out) => (true, out),
                FileRun::Failed(out) => {
                    info!(exercise = %exercise.name, file = %test_file, "Test {} failed", test_file);
                    (false, out)
                }
                FileRun::TimedOut => (
                    false,
                    format!(
                        "Test {} timed out after {} seconds.",
                        test_file,
                        self.timeout.as_secs()
                    ),
                ),
            };

            if let Err(e) = append_transcript(exercise, &text).await {
                warn!(exercise = %exercise.name, error = %e, "Could not append test output to transcript");
            }
            output = text;

            if !passed {
                return Ok(TestRun {
                    passed: false,
                    output,
                    files_run,
                });
            }
        }

        Ok(TestRun {
            passed: true,
            output,
            files_run,
        })
    }
}

async fn append_transcript(exercise: &Exercise, text: &str) -> Result<(), SandboxError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(history_path(&exercise.dir))
        .await?;
    file.write_all(format!("```\n{text}\n```\n").as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::corpus::tests::write_exercise;
    use crate::results::HISTORY_FILE;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Launcher that returns canned results per file and records calls.
    #[derive(Default)]
    pub(crate) struct ScriptedLauncher {
        pub results: Mutex<HashMap<String, Vec<FileRun>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedLauncher {
        pub(crate) fn with(file: &str, runs: Vec<FileRun>) -> Self {
            let launcher = Self::default();
            launcher.push(file, runs);
            launcher
        }

        pub(crate) fn push(&self, file: &str, runs: Vec<FileRun>) {
            self.results
                .lock()
                .unwrap()
                .entry(file.to_string())
                .or_default()
                .extend(runs);
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TestLauncher for ScriptedLauncher {
        async fn launch(&self, _exercise: &Exercise, test_file: &str, _timeout: Duration) -> FileRun {
            self.calls.lock().unwrap().push(test_file.to_string());
            let mut results = self.results.lock().unwrap();
            match results.get_mut(test_file) {
                Some(runs) if !runs.is_empty() => runs.remove(0),
                _ => FileRun::Passed(format!("{test_file} ok")),
            }
        }
    }

    fn two_file_exercise(temp: &TempDir) -> Exercise {
        let dir = write_exercise(temp.path(), "pair");
        std::fs::rename(dir.join("pair_test.py"), dir.join("a_test.py")).unwrap();
        std::fs::write(dir.join("b_test.py"), "def test_b(): pass\n").unwrap();
        Exercise::load(&dir).unwrap()
    }

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.image, "benchmark");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.network_mode, "none");
        assert_eq!(config.command_for("bob_test.py"), "pytest /app/bob_test.py");
    }

    #[tokio::test]
    async fn test_fail_fast_skips_later_files() {
        let temp = TempDir::new().unwrap();
        let exercise = two_file_exercise(&temp);
        let launcher = Arc::new(ScriptedLauncher::with(
            "a_test.py",
            vec![FileRun::Failed("E   assert 1 == 2".to_string())],
        ));
        let executor = SandboxExecutor::new(launcher.clone(), Duration::from_secs(5));

        let run = executor.execute(&exercise).await.unwrap();
        assert!(!run.passed);
        assert_eq!(run.output, "E   assert 1 == 2");
        assert_eq!(run.files_run, vec!["a_test.py".to_string()]);
        assert_eq!(launcher.calls(), vec!["a_test.py".to_string()]);
    }

    #[tokio::test]
    async fn test_all_files_pass() {
        let temp = TempDir::new().unwrap();
        let exercise = two_file_exercise(&temp);
        let launcher = Arc::new(ScriptedLauncher::default());
        let executor = SandboxExecutor::new(launcher.clone(), Duration::from_secs(5));

        let run = executor.execute(&exercise).await.unwrap();
        assert!(run.passed);
        assert_eq!(launcher.calls(), vec!["a_test.py".to_string(), "b_test.py".to_string()]);

        let transcript = std::fs::read_to_string(exercise.dir.join(HISTORY_FILE)).unwrap();
        assert!(transcript.contains("a_test.py ok"));
        assert!(transcript.contains("b_test.py ok"));
    }

    #[tokio::test]
    async fn test_timeout_reported_as_failure() {
        let temp = TempDir::new().unwrap();
        let exercise = two_file_exercise(&temp);
        let launcher = Arc::new(ScriptedLauncher::with("a_test.py", vec![FileRun::TimedOut]));
        let executor = SandboxExecutor::new(launcher.clone(), Duration::from_secs(60));

        let run = executor.execute(&exercise).await.unwrap();
        assert!(!run.passed);
        assert_eq!(run.output, "Test a_test.py timed out after 60 seconds.");
        assert_eq!(launcher.calls().len(), 1);

        let transcript = std::fs::read_to_string(exercise.dir.join(HISTORY_FILE)).unwrap();
        assert!(transcript.contains("timed out after 60 seconds"));
    }

    #[tokio::test]
    async fn test_transcript_failure_keeps_verdict() {
        let temp = TempDir::new().unwrap();
        let exercise = two_file_exercise(&temp);
        // A directory in place of the transcript makes every append fail.
        std::fs::create_dir(exercise.dir.join(HISTORY_FILE)).unwrap();
        let launcher = Arc::new(ScriptedLauncher::default());
        let executor = SandboxExecutor::new(launcher.clone(), Duration::from_secs(5));

        let run = executor.execute(&exercise).await.unwrap();
        assert!(run.passed);
        assert_eq!(launcher.calls().len(), 2);
    }
}
