//! The remote execution boundary and the operator confirmation seam.
//!
//! Everything the core does to a managed host goes through
//! [`RemoteExecutor`]. Adapters live outside this crate.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::command::RemoteCommand;
use crate::context::Host;
use crate::error::ExecError;

/// A host plus the account to log in as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Remote host.
    pub host: Host,
    /// Login user; `None` means the executor's administrative account.
    pub user: Option<String>,
}

impl Target {
    /// Target `host` as the administrative account.
    pub fn admin(host: &Host) -> Self {
        Self {
            host: host.clone(),
            user: None,
        }
    }

    /// Target `host` as `user`.
    pub fn as_user(host: &Host, user: &str) -> Self {
        Self {
            host: host.clone(),
            user: Some(user.to_string()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

/// How a non-zero exit status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Non-zero exit becomes [`ExecError::CommandFailed`].
    Checked,
    /// Non-zero exit is returned in [`ExecOutput::status`].
    BestEffort,
}

/// Result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status, -1 if the process was killed.
    pub status: i32,
}

impl ExecOutput {
    /// Output of a command that exited 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: 0,
        }
    }

    /// Output of a command that exited with `status`.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status,
        }
    }

    /// True when the command exited 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Check the status and convert a failure into an error.
    pub fn into_checked(self, target: &Target, command: &RemoteCommand) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                host: target.host.to_string(),
                command: command.to_shell(),
                status: self.status,
                stderr: self.stderr.trim_end().to_string(),
            })
        }
    }
}

/// Runs commands and uploads files on managed hosts.
///
/// Calls block the operation until the remote side finishes. No timeout is
/// applied.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `target`.
    ///
    /// In [`ExecMode::Checked`] a non-zero exit is an error carrying the
    /// remote stderr. In [`ExecMode::BestEffort`] it is returned as output.
    async fn run(
        &self,
        target: &Target,
        command: &RemoteCommand,
        mode: ExecMode,
    ) -> Result<ExecOutput, ExecError>;

    /// Write `content` to `remote_path` on `target`, replacing any file there.
    async fn upload(&self, target: &Target, content: &str, remote_path: &Path)
        -> Result<(), ExecError>;
}

/// Asks the operator a yes/no question.
pub trait Confirm: Send + Sync {
    /// Return true if the operator agreed. Defaults to no.
    fn confirm(&self, prompt: &str) -> bool;
}

/// A fixed answer, for unattended runs and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirm(pub bool);

impl Confirm for StaticConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::info!(answer = self.0, "auto-answering confirmation: {}", prompt.lines().next().unwrap_or(""));
        self.0
    }
}
