//! Coding agent collaborator.
//!
//! The harness never looks inside the agent. Each exercise gets its own
//! [`Coder`] from a [`CoderFactory`]; every turn returns an explicit
//! [`AgentTurn`] carrying the cost incurred, the operator-interrupt flag and
//! the I/O counters, instead of the harness inspecting agent state.

pub mod command;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::corpus::Exercise;
use crate::error::AgentError;

pub use command::{CommandCoder, CommandCoderFactory};

/// What one agent invocation reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTurn {
    /// Cost incurred by this turn, in dollars.
    #[serde(default)]
    pub cost: f64,
    /// The operator interrupted the agent; the whole run must stop.
    #[serde(default)]
    pub interrupted: bool,
    /// Error messages the agent's I/O layer emitted during the turn.
    #[serde(default, rename = "num_error_outputs")]
    pub error_outputs: u64,
    /// Times the agent asked the operator a question during the turn.
    #[serde(default, rename = "num_user_asks")]
    pub user_asks: u64,
}

/// Per-exercise settings handed to a [`CoderFactory`].
#[derive(Debug, Clone)]
pub struct CoderSession {
    pub model: String,
    pub edit_format: String,
    pub verbose: bool,
    /// Transcript the agent appends its chat history to.
    pub history_file: PathBuf,
}

/// An agent bound to one exercise's editable files.
#[async_trait]
pub trait Coder: Send {
    /// Gives the agent `instructions` and lets it edit its files.
    async fn run(&mut self, instructions: &str) -> Result<AgentTurn, AgentError>;
}

/// Creates a [`Coder`] for each exercise.
pub trait CoderFactory: Send + Sync {
    fn create(&self, exercise: &Exercise, session: &CoderSession)
        -> Result<Box<dyn Coder>, AgentError>;
}
