//! Error types for exercise-bench operations.
//!
//! Defines error types for each subsystem:
//! - Corpus layout and exercise loading
//! - Sandbox (Docker) test execution and image provisioning
//! - Outcome record persistence
//! - Agent collaborator invocation
//! - Top-level run failures surfaced by the CLI

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or preparing the exercise corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Not an exercise directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Exercise '{0}' has no hidden test files")]
    MissingHiddenTests(String),

    #[error("Exercise '{exercise}' is missing its instructions file {path}")]
    MissingInstructions { exercise: String, path: PathBuf },

    #[error("Pristine copy not found: {0}")]
    PristineMissing(PathBuf),

    #[error("Refusing to clean {0}: its files do not match the pristine exercise set")]
    UnsafeClean(PathBuf),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to launch sandbox: {0}")]
    Launch(String),

    #[error("Docker image build failed: {0}")]
    BuildFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while persisting outcome records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to persist record {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while driving the coding agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Run interrupted by operator during exercise '{exercise}'")]
    Interrupted { exercise: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
