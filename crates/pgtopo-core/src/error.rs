//! Error types for topology orchestration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`crate::context::ConfigContext`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// Host address is empty, contains whitespace or looks like an option.
    #[error("invalid host address: {host:?}")]
    InvalidHost {
        /// The rejected host string.
        host: String,
    },

    /// Cluster name contains characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid cluster name: {name:?}")]
    InvalidClusterName {
        /// The rejected cluster name.
        name: String,
    },

    /// Version string is not `MAJOR` or `MAJOR.MINOR`.
    #[error("invalid PostgreSQL version: {version:?}")]
    InvalidVersion {
        /// The rejected version string.
        version: String,
    },

    /// Port is not a non-zero u16.
    #[error("invalid port: {port:?}")]
    InvalidPort {
        /// The rejected port string.
        port: String,
    },

    /// Service account name is empty or unsafe.
    #[error("invalid service user: {user:?}")]
    InvalidServiceUser {
        /// The rejected user name.
        user: String,
    },

    /// A standby was asked to replicate from itself.
    #[error("standby {host} cannot replicate from itself")]
    SelfReplication {
        /// The host named as both primary and standby.
        host: String,
    },
}

/// Errors raised while rendering a configuration template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// A placeholder references a field the context does not provide.
    #[error("template {template}: missing field {field:?}")]
    MissingField {
        /// Template name.
        template: String,
        /// Placeholder name with no value.
        field: String,
    },

    /// A `{{` was never closed.
    #[error("template {template}: unterminated placeholder at byte {offset}")]
    Unterminated {
        /// Template name.
        template: String,
        /// Byte offset of the opening braces.
        offset: usize,
    },

    /// A template override could not be read from disk.
    #[error("template {template}: cannot read {path}: {reason}")]
    Load {
        /// Template name.
        template: String,
        /// Override path.
        path: PathBuf,
        /// Underlying I/O error text.
        reason: String,
    },
}

/// Errors raised at the remote execution boundary.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The remote command ran and exited non-zero in checked mode.
    #[error("command `{command}` on {host} exited with status {status}: {stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Rendered command line.
        command: String,
        /// Exit status (-1 when killed by a signal).
        status: i32,
        /// Remote stderr, verbatim.
        stderr: String,
    },

    /// The transport itself could not be started.
    #[error("cannot reach {host}: {source}")]
    Transport {
        /// Target host.
        host: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Uploading content to a remote path failed.
    #[error("upload of {path} to {host} failed: {reason}")]
    Upload {
        /// Target host.
        host: String,
        /// Remote destination path.
        path: PathBuf,
        /// Remote diagnostic text.
        reason: String,
    },
}

/// Errors raised by key generation and distribution.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// `ssh-keygen` failed.
    #[error("key generation at {path} failed: {reason}")]
    Generate {
        /// Private key path.
        path: PathBuf,
        /// Diagnostic text.
        reason: String,
    },

    /// The public key could not be read.
    #[error("cannot read public key {path}: {reason}")]
    ReadPublic {
        /// Public key path.
        path: PathBuf,
        /// Diagnostic text.
        reason: String,
    },

    /// The public key file exists but holds nothing usable.
    #[error("public key {path} is empty")]
    EmptyKey {
        /// Public key path.
        path: PathBuf,
    },
}

/// Errors raised while installing packages.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A package manager step failed.
    #[error("package step `{step}` failed on {host}")]
    Step {
        /// Short step name.
        step: &'static str,
        /// Target host.
        host: String,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },

    /// The source-list template failed to render.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Top-level error for every topology operation.
#[derive(Debug, Error)]
pub enum TopoError {
    /// Invalid operation parameters.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Template rendering failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A remote step failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Key handling failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Package installation failed.
    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, TopoError>;
