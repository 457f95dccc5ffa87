//! External command execution.
//!
//! Process and socket listings come from OS utilities (`ps`, `lsof`,
//! `netstat`, PowerShell). Every invocation runs under its own timeout so a
//! hung utility cannot stall discovery.
//!
//! The [`CommandRunner`] trait is the seam tests use to feed canned output.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for one external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// A program plus its arguments, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Errors running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Runs external commands and returns their standard output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ShellCommand) -> Result<String, CommandError>;

    /// Returns true when `program` can be found on `PATH`.
    async fn is_available(&self, program: &str) -> bool {
        let probe = ShellCommand::new("sh", ["-c".to_string(), format!("command -v {program}")]);
        self.run(&probe).await.is_ok()
    }
}

/// Runs commands on the host with a per-command timeout.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &ShellCommand) -> Result<String, CommandError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| CommandError::Spawn {
                program: command.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::Timeout {
                    program: command.program.clone(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        // lsof and friends exit non-zero when nothing matched; output still counts.
        if output.status.success() || !stdout.trim().is_empty() {
            debug!(command = %command, bytes = stdout.len(), "Command completed");
            return Ok(stdout);
        }

        Err(CommandError::Failed {
            program: command.program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
