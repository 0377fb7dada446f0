//! exercise-bench: evaluates a code-editing agent on an exercise corpus.
//!
//! For each exercise the agent edits stub files from written instructions,
//! hidden unit tests run in a disposable docker sandbox, failures are fed
//! back for a bounded number of retries, and the outcome is persisted next
//! to the exercise. Statistics are computed from the persisted records.

// Core modules
pub mod agent;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod results;
pub mod runner;
pub mod sandbox;
pub mod scheduler;
pub mod stats;

// Re-export commonly used types
pub use config::BenchConfig;
pub use error::{AgentError, BenchError, CorpusError, SandboxError, StoreError};
pub use results::OutcomeRecord;
pub use runner::{CancellationSignal, ExerciseOutcome, ExerciseRunner};
pub use scheduler::{RunReport, Scheduler};
pub use stats::CorpusStats;
