//! SSH key distribution for the service account.
//!
//! `promote` logs in as the service account, so that account must trust the
//! operator's key first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::RemoteCommand;
use crate::context::{Host, DEFAULT_SERVICE_USER, LIB_BASEDIR};
use crate::error::{CredentialError, Result};
use crate::executor::{ExecMode, RemoteExecutor, Target};

/// Default private key location on the operator's machine.
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";

/// Local key material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Create an RSA key pair at `key_path` with an empty passphrase.
    ///
    /// The empty passphrase is what unattended runs need. Anyone who can read
    /// the private key can log in as the service account.
    async fn generate(&self, key_path: &Path) -> std::result::Result<(), CredentialError>;

    /// Read the public half of the key at `key_path`.
    async fn read_public(&self, key_path: &Path) -> std::result::Result<String, CredentialError>;
}

/// Public key path for a private key path.
pub fn public_key_path(key_path: &Path) -> PathBuf {
    let mut os = key_path.as_os_str().to_owned();
    os.push(".pub");
    PathBuf::from(os)
}

/// Pushes operator keys to the service account on managed hosts.
pub struct CredentialManager {
    executor: Arc<dyn RemoteExecutor>,
    keys: Arc<dyn KeyStore>,
    service_user: String,
    ssh_dir: PathBuf,
}

impl CredentialManager {
    /// Create a manager for the default `postgres` account.
    pub fn new(executor: Arc<dyn RemoteExecutor>, keys: Arc<dyn KeyStore>) -> Self {
        Self {
            executor,
            keys,
            service_user: DEFAULT_SERVICE_USER.to_string(),
            ssh_dir: PathBuf::from(LIB_BASEDIR).join(".ssh"),
        }
    }

    /// Use a different service account name.
    pub fn with_service_user(mut self, user: impl Into<String>) -> Self {
        self.service_user = user.into();
        self
    }

    /// Append the operator's public key to the service account's
    /// `authorized_keys` on `host`, generating the pair first if asked.
    ///
    /// Remote steps are best-effort: an existing directory or file is fine.
    pub async fn push_key(&self, host: &Host, key_path: &Path, generate: bool) -> Result<()> {
        if generate {
            tracing::warn!(path = %key_path.display(), "generating key pair without passphrase");
            self.keys.generate(key_path).await?;
        }

        let key = self.keys.read_public(key_path).await?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CredentialError::EmptyKey {
                path: public_key_path(key_path),
            }
            .into());
        }

        let target = Target::admin(host);
        let authorized_keys = self.ssh_dir.join("authorized_keys");
        let steps = [
            RemoteCommand::new("mkdir").arg("-p").path_arg(&self.ssh_dir),
            RemoteCommand::new("chmod").arg("700").path_arg(&self.ssh_dir),
            RemoteCommand::new("tee")
                .arg("-a")
                .path_arg(&authorized_keys)
                .stdin(format!("{key}\n")),
            RemoteCommand::new("chown")
                .arg("-R")
                .arg(format!("{0}:{0}", self.service_user))
                .path_arg(&self.ssh_dir),
        ];

        tracing::info!(%host, user = %self.service_user, "pushing public key");
        for step in &steps {
            let out = self.executor.run(&target, step, ExecMode::BestEffort).await?;
            if !out.success() {
                tracing::warn!(%host, status = out.status, command = %step, "tolerated failure");
            }
        }
        Ok(())
    }
}
