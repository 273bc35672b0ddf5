//! Local key material managed with `ssh-keygen`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pgtopo_core::credentials::public_key_path;
use pgtopo_core::{CredentialError, KeyStore};
use tokio::process::Command;

/// Keys on the operator's machine.
#[derive(Debug, Clone)]
pub struct LocalKeyStore {
    keygen: String,
    home: Option<PathBuf>,
}

impl Default for LocalKeyStore {
    fn default() -> Self {
        Self {
            keygen: String::from("ssh-keygen"),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

impl LocalKeyStore {
    /// Key store using `ssh-keygen` from `PATH` and `$HOME` for `~`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `~` against a fixed home directory.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Expand a leading `~/`.
    pub fn expand(&self, path: &Path) -> PathBuf {
        match (path.strip_prefix("~"), &self.home) {
            (Ok(rest), Some(home)) => home.join(rest),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn generate(&self, key_path: &Path) -> Result<(), CredentialError> {
        let path = self.expand(key_path);
        let fail = |reason: String| CredentialError::Generate {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }

        let output = Command::new(&self.keygen)
            .args(["-q", "-t", "rsa", "-N", "", "-f"])
            .arg(&path)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !output.status.success() {
            return Err(fail(
                String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            ));
        }
        tracing::info!(path = %path.display(), "generated RSA key pair with empty passphrase");
        Ok(())
    }

    async fn read_public(&self, key_path: &Path) -> Result<String, CredentialError> {
        let path = public_key_path(&self.expand(key_path));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CredentialError::ReadPublic {
                path,
                reason: e.to_string(),
            })
    }
}
