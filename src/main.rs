//! exercise-bench CLI entry point.
//!
//! Initializes logging and delegates to the CLI module.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = exercise_bench::cli::parse_cli();

    // Priority: RUST_LOG env var > --verbose > --log-level CLI arg
    let log_filter = if cli.verbose && cli.log_level == "info" {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    exercise_bench::cli::run_with_cli(cli).await
}
