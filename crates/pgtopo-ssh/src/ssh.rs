//! Remote execution through the system OpenSSH client.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use pgtopo_core::{ExecError, ExecMode, ExecOutput, RemoteCommand, RemoteExecutor, Target};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status OpenSSH uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

const UPLOAD_SCRIPT: &str = r#"cat > "$1""#;

/// How to reach managed hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// `ssh` binary to run.
    pub program: String,
    /// Administrative login user.
    pub user: String,
    /// SSH port on managed hosts.
    pub port: u16,
    /// Private key passed with `-i`.
    pub identity_file: Option<PathBuf>,
    /// Forward the local agent (`-A`).
    pub forward_agent: bool,
    /// Refuse interactive password prompts.
    pub batch_mode: bool,
    /// Bound on connection setup only; remote commands are never timed out.
    pub connect_timeout_secs: Option<u64>,
    /// Extra `-o` options, passed through verbatim.
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: String::from("ssh"),
            user: String::from("root"),
            port: 22,
            identity_file: None,
            forward_agent: true,
            batch_mode: false,
            connect_timeout_secs: None,
            options: Vec::new(),
        }
    }
}

/// Runs commands with `ssh <host> <command>`.
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    /// Create an executor.
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments placed before the remote command.
    pub fn ssh_args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.config.port.to_string(),
            "-l".to_string(),
            target
                .user
                .clone()
                .unwrap_or_else(|| self.config.user.clone()),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        if self.config.forward_agent {
            args.push("-A".to_string());
        }
        if self.config.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if let Some(secs) = self.config.connect_timeout_secs {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={secs}"));
        }
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push("--".to_string());
        args.push(target.host.bare().to_string());
        args
    }

    async fn spawn(&self, target: &Target, command: &RemoteCommand) -> Result<ExecOutput, ExecError> {
        let host = target.host.to_string();
        let line = command.to_shell();
        tracing::debug!(target = %target, command = %line, "ssh");

        let mut child = Command::new(&self.config.program)
            .args(self.ssh_args(target))
            .arg(&line)
            .stdin(if command.stdin_payload().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Transport {
                host: host.clone(),
                source,
            })?;

        if let (Some(payload), Some(mut stdin)) = (command.stdin_payload(), child.stdin.take()) {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|source| ExecError::Transport {
                    host: host.clone(),
                    source,
                })?;
            stdin.shutdown().await.map_err(|source| ExecError::Transport {
                host: host.clone(),
                source,
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ExecError::Transport {
                host: host.clone(),
                source,
            })?;

        let out = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };
        if out.status == SSH_ERROR_STATUS {
            return Err(ExecError::Transport {
                host,
                source: io::Error::new(io::ErrorKind::Other, out.stderr.trim_end().to_string()),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        target: &Target,
        command: &RemoteCommand,
        mode: ExecMode,
    ) -> Result<ExecOutput, ExecError> {
        let out = self.spawn(target, command).await?;
        match mode {
            ExecMode::Checked => out.into_checked(target, command),
            ExecMode::BestEffort => Ok(out),
        }
    }

    async fn upload(
        &self,
        target: &Target,
        content: &str,
        remote_path: &Path,
    ) -> Result<(), ExecError> {
        let command = upload_command(remote_path, content);
        let out = self.spawn(target, &command).await?;
        if out.success() {
            tracing::debug!(target = %target, path = %remote_path.display(), bytes = content.len(), "uploaded");
            Ok(())
        } else {
            Err(ExecError::Upload {
                host: target.host.to_string(),
                path: remote_path.to_path_buf(),
                reason: out.stderr.trim_end().to_string(),
            })
        }
    }
}

/// The command that writes stdin to `remote_path`.
pub fn upload_command(remote_path: &Path, content: &str) -> RemoteCommand {
    RemoteCommand::new("sh")
        .arg("-c")
        .arg(UPLOAD_SCRIPT)
        .arg("sh")
        .path_arg(remote_path)
        .stdin(content)
}
