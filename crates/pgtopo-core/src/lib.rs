#![warn(missing_docs)]

//! pgtopo core: PostgreSQL primary/standby topology orchestration over remote execution

pub mod command;
pub mod context;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod packages;
pub mod provisioner;
pub mod template;
pub mod topology;

pub use command::RemoteCommand;
pub use context::{ConfigContext, Host, Paths, PgVersion};
pub use credentials::{CredentialManager, KeyStore, DEFAULT_KEY_PATH};
pub use error::{ContextError, CredentialError, ExecError, PackageError, Result, TemplateError, TopoError};
pub use executor::{Confirm, ExecMode, ExecOutput, RemoteExecutor, StaticConfirm, Target};
pub use packages::{AptInstaller, PackageInstaller, PackageSet};
pub use provisioner::{NodeProvisioner, ResetOutcome};
pub use template::{TemplateKind, TemplateSet};
pub use topology::{
    AttachReport, AuthorizationOutcome, AuthorizedStandby, Node, NodeRole, PromoteOptions,
    StandbyAttachment, TopologyManager, DEFAULT_CLUSTER, DEFAULT_PORT, DEFAULT_VERSION,
};
