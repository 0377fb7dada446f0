//! Command-line interface for exercise-bench.
//!
//! One command: prepare the corpus directory, run the selected exercises,
//! and print the corpus statistics (or only print them with `--stats-only`).

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
