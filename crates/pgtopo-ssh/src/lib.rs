#![warn(missing_docs)]

//! pgtopo adapters: OpenSSH remote executor, dry-run executor, local ssh-keygen key store

pub mod dry_run;
pub mod keys;
pub mod ssh;

pub use dry_run::DryRunExecutor;
pub use keys::LocalKeyStore;
pub use ssh::{SshConfig, SshExecutor};
