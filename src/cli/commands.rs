//! CLI definition and the benchmark run command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tracing::{info, warn};

use crate::agent::CommandCoderFactory;
use crate::config::{
    default_edit_format, BenchConfig, DEFAULT_BENCHMARK_ROOT, DEFAULT_MODEL, PRISTINE_DIR_NAME,
};
use crate::corpus::{self, clean_corpus, commit_identifier, materialize, resolve_corpus_dir};
use crate::error::BenchError;
use crate::runner::{CancellationSignal, ExerciseOutcome, ExerciseRunner};
use crate::sandbox::{DockerLauncher, ImageStatus, SandboxConfig, SandboxExecutor, SandboxImage};
use crate::scheduler::{RunReport, Scheduler};
use crate::stats;

/// Evaluate a coding agent against a corpus of exercises with hidden tests.
#[derive(Parser, Debug)]
#[command(name = "exercise-bench")]
#[command(version)]
#[command(
    long_about = "exercise-bench runs a coding agent on every exercise of a corpus, checks its edits \
against hidden unit tests in a disposable docker sandbox, retries with the failing output, and \
reports cumulative pass rates.\n\nExample usage:\n  exercise-bench my-run --model gpt-4 --threads 4"
)]
pub struct Cli {
    /// Corpus directory; a bare name is placed under the benchmark root.
    pub dirname: PathBuf,

    /// Model identifier handed to the agent.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Edit format (defaults to the model's preferred format).
    #[arg(short, long)]
    pub edit_format: Option<String>,

    /// Only run exercises whose directory name contains this substring.
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Archive the existing corpus copy and start from a pristine one.
    #[arg(short, long)]
    pub clean: bool,

    /// Let the agent edit but never run the hidden tests.
    #[arg(long)]
    pub no_unit_tests: bool,

    /// Verbose agent and harness output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print statistics for the corpus directory.
    #[arg(short, long)]
    pub stats_only: bool,

    /// Attempt budget per exercise.
    #[arg(short, long, default_value = "2")]
    pub retries: usize,

    /// Number of exercises evaluated concurrently.
    #[arg(short, long, default_value = "1")]
    pub threads: usize,

    /// Cap on the number of (shuffled) exercises to run.
    #[arg(short = 'n', long)]
    pub num_tests: Option<usize>,

    /// Root directory for bare corpus names and the pristine set.
    #[arg(long, env = "BENCHMARK_ROOT", default_value = DEFAULT_BENCHMARK_ROOT)]
    pub benchmark_root: PathBuf,

    /// Pristine exercise set (defaults to <benchmark root>/practice).
    #[arg(long)]
    pub pristine_dir: Option<PathBuf>,

    /// Agent executable invoked once per attempt.
    #[arg(long, default_value = "bench-agent")]
    pub agent_cmd: String,

    /// Sandbox image name.
    #[arg(long, default_value = "benchmark")]
    pub image: String,

    /// Recipe used to build the sandbox image when it is missing.
    #[arg(long, default_value = "benchmark/Dockerfile")]
    pub dockerfile: PathBuf,

    /// Per test file timeout in seconds.
    #[arg(long, default_value = "60")]
    pub test_timeout: u64,

    /// Test command run in the sandbox; `{file}` is replaced by the test file.
    #[arg(long, default_value = "pytest /app/{file}")]
    pub test_command: String,

    /// API key forwarded to the agent.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Print the final statistics as JSON.
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// The pristine exercise set for this invocation.
    pub fn pristine_dir(&self) -> PathBuf {
        self.pristine_dir
            .clone()
            .unwrap_or_else(|| self.benchmark_root.join(PRISTINE_DIR_NAME))
    }

    /// Run configuration derived from the flags.
    pub fn bench_config(&self, commit_hash: impl Into<String>) -> BenchConfig {
        let edit_format = self
            .edit_format
            .clone()
            .unwrap_or_else(|| default_edit_format(&self.model).to_string());
        let config = BenchConfig::new(&self.model)
            .with_edit_format(edit_format)
            .with_max_attempts(self.retries)
            .with_threads(self.threads)
            .with_verbose(self.verbose)
            .with_commit_hash(commit_hash)
            .with_pristine_dir(self.pristine_dir());
        if self.no_unit_tests {
            config.without_unit_tests()
        } else {
            config
        }
    }

    /// Sandbox configuration derived from the flags.
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::new(&self.image)
            .with_dockerfile(&self.dockerfile)
            .with_timeout(Duration::from_secs(self.test_timeout))
            .with_test_command(&self.test_command)
    }
}

/// Parse CLI arguments without running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the benchmark with parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let now = Local::now().naive_local();
    let corpus_dir = resolve_corpus_dir(&cli.dirname, &cli.benchmark_root, now);

    if cli.stats_only {
        return print_stats(&corpus_dir, cli.json);
    }

    // Reject bad settings before touching the corpus directory.
    let config = cli.bench_config(commit_identifier().await);
    config.validate()?;

    let pristine = cli.pristine_dir();
    if cli.clean && corpus_dir.exists() {
        let cleaned = clean_corpus(&corpus_dir, &pristine, now).map_err(BenchError::from)?;
        info!("Archived previous copy to {}", cleaned.archived_to.display());
    }
    materialize(&corpus_dir, &pristine).map_err(BenchError::from)?;

    let names = corpus::list_exercises(&corpus_dir).map_err(BenchError::from)?;
    let names = corpus::select(names, cli.keyword.as_deref(), cli.num_tests, &mut rand::rng());
    info!(
        model = %config.model,
        edit_format = %config.edit_format,
        commit = %config.commit_hash,
        exercises = names.len(),
        "Prepared corpus {}",
        corpus_dir.display()
    );

    let sandbox_config = cli.sandbox_config();
    if !config.no_unit_tests {
        if let ImageStatus::BuildFailed(reason) = SandboxImage::new(&sandbox_config).ensure().await {
            warn!("Sandbox image unavailable, tests may fail: {}", reason);
        }
    }
    let executor = SandboxExecutor::new(
        Arc::new(DockerLauncher::new(sandbox_config.clone())),
        sandbox_config.timeout,
    );
    let coders = CommandCoderFactory::new(&cli.agent_cmd).with_api_key(cli.api_key.clone());
    let threads = config.threads;
    let runner = Arc::new(ExerciseRunner::new(config, Arc::new(coders), executor));

    let cancel = CancellationSignal::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping at the next attempt boundary");
            ctrl_c.cancel();
        }
    });

    let report = Scheduler::new(runner, &corpus_dir, threads, cancel)
        .run(names)
        .await;
    print_run_summary(&report);
    print_stats(&corpus_dir, cli.json)?;

    if report.interrupted {
        return Err(BenchError::Interrupted {
            exercise: interrupted_exercise(&report),
        }
        .into());
    }
    Ok(())
}

fn interrupted_exercise(report: &RunReport) -> String {
    report
        .outcomes
        .iter()
        .find(|o| o.is_interrupted())
        .map(|o| o.exercise().to_string())
        .unwrap_or_else(|| "<none started>".to_string())
}

fn print_run_summary(report: &RunReport) {
    println!();
    println!(
        "This run: {} evaluated ({} passed), {} already done, {} dry-run, {} skipped",
        report.completed(),
        report.passed(),
        report.already_done(),
        report.dry_runs(),
        report.skipped()
    );
    for outcome in &report.outcomes {
        if let ExerciseOutcome::Skipped { exercise, reason } = outcome {
            println!("  skipped {exercise}: {reason}");
        }
    }
}

fn print_stats(corpus_dir: &Path, json: bool) -> anyhow::Result<()> {
    let stats = stats::summarize(corpus_dir).map_err(BenchError::from)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats).map_err(BenchError::from)?);
    } else {
        println!();
        print!("{stats}");
        for field in stats.inconsistent_fields() {
            warn!(field, "Corpus mixes records from different configurations");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["exercise-bench", "run1"]).expect("should parse");
        assert_eq!(cli.dirname, PathBuf::from("run1"));
        assert_eq!(cli.model, DEFAULT_MODEL);
        assert_eq!(cli.retries, 2);
        assert_eq!(cli.threads, 1);
        assert!(cli.num_tests.is_none());
        assert!(!cli.clean && !cli.stats_only && !cli.no_unit_tests);
        assert_eq!(cli.test_timeout, 60);
        assert_eq!(cli.pristine_dir(), cli.benchmark_root.join("practice"));
    }

    #[test]
    fn test_all_short_flags() {
        let cli = Cli::try_parse_from([
            "exercise-bench",
            "run1",
            "-m",
            "gpt-4",
            "-k",
            "word",
            "-c",
            "-v",
            "-s",
            "-r",
            "3",
            "-t",
            "4",
            "-n",
            "10",
        ])
        .expect("should parse");
        assert_eq!(cli.model, "gpt-4");
        assert_eq!(cli.keyword.as_deref(), Some("word"));
        assert!(cli.clean && cli.verbose && cli.stats_only);
        assert_eq!(cli.retries, 3);
        assert_eq!(cli.threads, 4);
        assert_eq!(cli.num_tests, Some(10));
    }

    #[test]
    fn test_bench_config_from_flags() {
        let cli = Cli::try_parse_from([
            "exercise-bench",
            "run1",
            "--model",
            "gpt-4-0613",
            "--no-unit-tests",
            "--pristine-dir",
            "/corpus/practice",
        ])
        .expect("should parse");
        let config = cli.bench_config("abc1234");
        assert_eq!(config.edit_format, "diff");
        assert!(config.no_unit_tests);
        assert_eq!(config.commit_hash, "abc1234");
        assert_eq!(config.pristine_dir, PathBuf::from("/corpus/practice"));

        let cli = Cli::try_parse_from(["exercise-bench", "run1", "-m", "gpt-4", "-e", "whole"])
            .expect("should parse");
        assert_eq!(cli.bench_config("x").edit_format, "whole");
    }

    #[test]
    fn test_sandbox_config_from_flags() {
        let cli = Cli::try_parse_from([
            "exercise-bench",
            "run1",
            "--image",
            "bench:py3",
            "--test-timeout",
            "5",
            "--test-command",
            "python -m pytest {file}",
        ])
        .expect("should parse");
        let config = cli.sandbox_config();
        assert_eq!(config.image, "bench:py3");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.command_for("a_test.py"), "python -m pytest a_test.py");
    }

    #[test]
    fn test_zero_retries_rejected() {
        let cli = Cli::try_parse_from(["exercise-bench", "run1", "-r", "0"]).expect("should parse");
        assert!(cli.bench_config("x").validate().is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_corpus_untouched() {
        let temp = tempfile::TempDir::new().unwrap();
        let pristine = temp.path().join("practice");
        let corpus_dir = temp.path().join("run1");
        std::fs::create_dir_all(pristine.join("bob")).unwrap();
        std::fs::create_dir_all(corpus_dir.join("bob")).unwrap();

        let args: Vec<std::ffi::OsString> = vec![
            "exercise-bench".into(),
            corpus_dir.clone().into(),
            "--pristine-dir".into(),
            pristine.clone().into(),
            "--clean".into(),
            "-r".into(),
            "0".into(),
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert!(run_with_cli(cli).await.is_err());
        assert!(corpus_dir.join("bob").is_dir());
        assert!(!temp.path().join(crate::corpus::layout::ARCHIVE_DIR).exists());
    }
}
