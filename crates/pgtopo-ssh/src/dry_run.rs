//! An executor that prints the plan instead of running it.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use pgtopo_core::credentials::public_key_path;
use pgtopo_core::{
    CredentialError, ExecError, ExecMode, ExecOutput, KeyStore, RemoteCommand, RemoteExecutor,
    Target,
};

/// Programs whose exit status answers a question rather than reporting success.
const PROBES: [&str; 2] = ["grep", "test"];

/// Prints every remote step and pretends it succeeded.
///
/// Probes (`grep`, `test`) report "not found" so the printed plan includes
/// every mutation a first run would make. Local key generation is printed,
/// not run.
#[derive(Default)]
pub struct DryRunExecutor {
    steps: Mutex<Vec<String>>,
    quiet: bool,
}

impl DryRunExecutor {
    /// Executor that prints each step to stderr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that only records steps.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Steps recorded so far.
    pub fn steps(&self) -> Vec<String> {
        self.steps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, line: String) {
        if !self.quiet {
            eprintln!("{line}");
        }
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(line);
        }
    }
}

#[async_trait]
impl RemoteExecutor for DryRunExecutor {
    async fn run(
        &self,
        target: &Target,
        command: &RemoteCommand,
        _mode: ExecMode,
    ) -> Result<ExecOutput, ExecError> {
        let mut line = format!("[{target}] $ {command}");
        if let Some(input) = command.stdin_payload() {
            line.push_str(&format!("  <<< {:?}", input.trim()));
        }
        self.record(line);

        if PROBES.contains(&command.program()) {
            Ok(ExecOutput::failed(1, ""))
        } else {
            Ok(ExecOutput::ok(""))
        }
    }

    async fn upload(
        &self,
        target: &Target,
        content: &str,
        remote_path: &Path,
    ) -> Result<(), ExecError> {
        self.record(format!(
            "[{target}] upload {} ({} bytes)",
            remote_path.display(),
            content.len()
        ));
        Ok(())
    }
}

#[async_trait]
impl KeyStore for DryRunExecutor {
    async fn generate(&self, key_path: &Path) -> Result<(), CredentialError> {
        self.record(format!(
            "[local] $ ssh-keygen -q -t rsa -N '' -f {}",
            key_path.display()
        ));
        Ok(())
    }

    async fn read_public(&self, key_path: &Path) -> Result<String, CredentialError> {
        Ok(format!("<contents of {}>", public_key_path(key_path).display()))
    }
}
