//! Subprocess agent adapter.
//!
//! Runs any command-line agent that reads its instructions on stdin and
//! edits the files named on its command line. The agent reports the turn
//! on its last JSON stdout line:
//!
//! ```text
//! {"cost": 0.0123, "interrupted": false, "num_error_outputs": 0, "num_user_asks": 1}
//! ```
//!
//! Missing fields default to zero. Exit code 130 (SIGINT) also marks the
//! turn as interrupted.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{AgentTurn, Coder, CoderFactory, CoderSession};
use crate::corpus::Exercise;
use crate::error::AgentError;

/// Exit code of a process stopped by Ctrl-C.
const SIGINT_EXIT_CODE: i32 = 130;

/// Builds [`CommandCoder`]s for a given agent executable.
#[derive(Debug, Clone)]
pub struct CommandCoderFactory {
    /// Agent executable.
    command: String,
    /// Extra arguments placed before the generated ones.
    args: Vec<String>,
    /// API key forwarded to the agent.
    api_key: Option<String>,
}

impl CommandCoderFactory {
    /// Creates a factory for the given agent command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            api_key: None,
        }
    }

    /// Sets extra leading arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the API key exported to the agent as `OPENAI_API_KEY`.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Builds the concrete coder for one exercise.
    pub fn build(&self, exercise: &Exercise, session: &CoderSession) -> CommandCoder {
        let mut args = self.args.clone();
        args.extend([
            "--model".to_string(),
            session.model.clone(),
            "--edit-format".to_string(),
            session.edit_format.clone(),
            "--chat-history-file".to_string(),
            session.history_file.to_string_lossy().to_string(),
        ]);
        if session.verbose {
            args.push("--verbose".to_string());
        }
        args.extend(exercise.editable_files.iter().cloned());

        CommandCoder {
            command: self.command.clone(),
            args,
            working_dir: exercise.dir.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

impl CoderFactory for CommandCoderFactory {
    fn create(
        &self,
        exercise: &Exercise,
        session: &CoderSession,
    ) -> Result<Box<dyn Coder>, AgentError> {
        Ok(Box::new(self.build(exercise, session)))
    }
}

/// One agent subprocess invocation per turn, scoped to an exercise directory.
#[derive(Debug, Clone)]
pub struct CommandCoder {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    api_key: Option<String>,
}

impl CommandCoder {
    /// Arguments passed on every turn.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Coder for CommandCoder {
    async fn run(&mut self, instructions: &str) -> Result<AgentTurn, AgentError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref key) = self.api_key {
            cmd.env("OPENAI_API_KEY", key);
        }

        info!("Starting agent: {} in {}", self.command, self.working_dir.display());
        let mut child = cmd.spawn().map_err(|e| AgentError::Spawn {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(instructions.as_bytes()).await.map_err(|e| {
                AgentError::ExecutionFailed(format!("Failed to write instructions: {}", e))
            })?;
            stdin.shutdown().await.ok();
        }

        let output = child.wait_with_output().await?;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(
            exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Agent turn finished"
        );

        let mut turn = parse_report(&stdout);
        if exit_code == SIGINT_EXIT_CODE {
            turn.interrupted = true;
        } else if !output.status.success() && !turn.interrupted {
            return Err(AgentError::ExecutionFailed(format!(
                "Agent exited with code {}: {}",
                exit_code,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(turn)
    }
}

/// Extracts the turn report from the last JSON line of agent stdout.
fn parse_report(stdout: &str) -> AgentTurn {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<AgentTurn>(line).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::write_exercise;
    use tempfile::TempDir;

    #[test]
    fn test_parse_report_last_json_line() {
        let stdout = "Applied edit to bob.py\n{\"cost\": 0.5}\nnoise\n{\"cost\": 0.25, \"num_user_asks\": 2}\n";
        let turn = parse_report(stdout);
        assert_eq!(turn.cost, 0.25);
        assert_eq!(turn.user_asks, 2);
        assert_eq!(turn.error_outputs, 0);
        assert!(!turn.interrupted);
    }

    #[test]
    fn test_parse_report_defaults_without_json() {
        assert_eq!(parse_report("no report here\n"), AgentTurn::default());
    }

    #[test]
    fn test_parse_report_interrupted() {
        let turn = parse_report("{\"interrupted\": true, \"num_error_outputs\": 3}");
        assert!(turn.interrupted);
        assert_eq!(turn.error_outputs, 3);
    }

    #[test]
    fn test_factory_builds_arguments() {
        let temp = TempDir::new().unwrap();
        let dir = write_exercise(temp.path(), "bob");
        let exercise = Exercise::load(&dir).unwrap();
        let session = CoderSession {
            model: "gpt-4".to_string(),
            edit_format: "diff".to_string(),
            verbose: true,
            history_file: dir.join(".bench.chat.history.md"),
        };

        let factory = CommandCoderFactory::new("bench-agent").with_args(vec!["--no-git".into()]);
        let coder = factory.build(&exercise, &session);

        let args = coder.args();
        assert_eq!(args[0], "--no-git");
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "gpt-4"));
        assert!(args.windows(2).any(|w| w[0] == "--edit-format" && w[1] == "diff"));
        assert!(args.contains(&"--verbose".to_string()));
        assert_eq!(args.last().unwrap(), "bob.py");
        assert!(factory.create(&exercise, &session).is_ok());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_agent_error() {
        let temp = TempDir::new().unwrap();
        let mut coder = CommandCoder {
            command: "definitely-not-an-agent-binary".to_string(),
            args: Vec::new(),
            working_dir: temp.path().to_path_buf(),
            api_key: None,
        };
        let err = coder.run("do it").await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
    }
}
