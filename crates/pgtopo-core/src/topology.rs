//! Topology operations: set up a primary, attach a standby, promote.
//!
//! Operations are meant to be issued one at a time by an operator. Two
//! concurrent `attach_standby` calls against the same primary race on its
//! `pg_hba.conf`; nothing here locks it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::command::RemoteCommand;
use crate::context::{validate_service_user, ConfigContext, Host, DEFAULT_SERVICE_USER};
use crate::credentials::{CredentialManager, KeyStore, DEFAULT_KEY_PATH};
use crate::error::{ContextError, ExecError, Result};
use crate::executor::{Confirm, ExecMode, RemoteExecutor, Target};
use crate::packages::PackageInstaller;
use crate::provisioner::{NodeProvisioner, ResetOutcome};
use crate::template::{TemplateKind, TemplateSet};

/// Default PostgreSQL version.
pub const DEFAULT_VERSION: &str = "9.3";
/// Default cluster name.
pub const DEFAULT_CLUSTER: &str = "main";
/// Default cluster port.
pub const DEFAULT_PORT: u16 = 5432;

/// Replication role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes and streams WAL to standbys.
    Primary,
    /// Replays WAL from a primary.
    Standby,
}

/// A node as left by a topology operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Host address.
    pub address: Host,
    /// Role after the operation.
    pub role: NodeRole,
    /// Primary this node streams from; set only for standbys.
    pub replicates_from: Option<Host>,
    /// Cluster name.
    pub cluster_name: String,
    /// PostgreSQL version.
    pub version: String,
    /// Cluster port.
    pub port: u16,
}

impl Node {
    fn primary(address: &Host, ctx: &ConfigContext) -> Self {
        Self {
            address: address.clone(),
            role: NodeRole::Primary,
            replicates_from: None,
            cluster_name: ctx.cluster_name().to_string(),
            version: ctx.version().to_string(),
            port: ctx.port(),
        }
    }

    fn standby(address: &Host, ctx: &ConfigContext) -> Self {
        Self {
            role: NodeRole::Standby,
            replicates_from: Some(ctx.primary().clone()),
            ..Self::primary(address, ctx)
        }
    }
}

/// Result of the primary-side half of an attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    /// The entry was added and the primary reloaded.
    Appended,
    /// An identical entry was already there; nothing changed.
    AlreadyPresent,
}

/// Everything an attach did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachReport {
    /// The primary the standby now streams from.
    pub primary: Node,
    /// The attached standby.
    pub standby: Node,
    /// What happened to `pg_hba.conf` on the primary.
    pub authorization: AuthorizationOutcome,
    /// True when the operator declined the data directory reset, so the
    /// standby still holds whatever data it had before.
    pub reset_declined: bool,
}

/// Options for `promote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOptions {
    /// Push the operator key to the service account first.
    pub push_key: bool,
    /// Generate the key pair before pushing it.
    pub generate_key: bool,
    /// Private key location.
    pub key_path: PathBuf,
}

impl Default for PromoteOptions {
    fn default() -> Self {
        Self {
            push_key: false,
            generate_key: false,
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
        }
    }
}

/// Orchestrates topology changes across hosts.
pub struct TopologyManager {
    executor: Arc<dyn RemoteExecutor>,
    provisioner: NodeProvisioner,
    credentials: CredentialManager,
    templates: Arc<TemplateSet>,
    service_user: String,
}

impl TopologyManager {
    /// Wire a manager from its collaborators.
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        installer: Arc<dyn PackageInstaller>,
        confirm: Arc<dyn Confirm>,
        keys: Arc<dyn KeyStore>,
        templates: Arc<TemplateSet>,
    ) -> Self {
        Self {
            provisioner: NodeProvisioner::new(
                executor.clone(),
                installer,
                confirm,
                templates.clone(),
            ),
            credentials: CredentialManager::new(executor.clone(), keys),
            executor,
            templates,
            service_user: DEFAULT_SERVICE_USER.to_string(),
        }
    }

    /// Use a service account other than `postgres`.
    pub fn with_service_user(mut self, user: impl Into<String>) -> std::result::Result<Self, ContextError> {
        let user = user.into();
        validate_service_user(&user)?;
        self.credentials = self.credentials.with_service_user(user.clone());
        self.service_user = user;
        Ok(self)
    }

    /// Install repmgr tooling on provisioned nodes.
    pub fn with_repmgr(mut self, enabled: bool) -> Self {
        self.provisioner = self.provisioner.with_repmgr(enabled);
        self
    }

    fn context(
        &self,
        primary: &Host,
        standby: Option<&Host>,
        version: &str,
        cluster_name: &str,
        port: u16,
    ) -> Result<ConfigContext> {
        Ok(
            ConfigContext::new(primary.clone(), standby.cloned(), version, cluster_name, port)?
                .with_service_user(&self.service_user)?,
        )
    }

    /// Provision `primary` as a standalone primary.
    #[tracing::instrument(skip_all, fields(operation_id = %Uuid::new_v4(), primary = %primary))]
    pub async fn setup_primary(
        &self,
        primary: &Host,
        version: &str,
        cluster_name: &str,
        port: u16,
    ) -> Result<Node> {
        let ctx = self.context(primary, None, version, cluster_name, port)?;
        self.provisioner.provision(&ctx, primary, false).await?;
        Ok(Node::primary(primary, &ctx))
    }

    /// Start a two-phase attach of `standby` to `primary`.
    ///
    /// Validation happens here; no remote call is made until
    /// [`StandbyAttachment::authorize`].
    pub fn plan_attach(
        &self,
        primary: &Host,
        standby: &Host,
        version: &str,
        cluster_name: &str,
        port: u16,
    ) -> Result<StandbyAttachment<'_>> {
        let ctx = self.context(primary, Some(standby), version, cluster_name, port)?;
        Ok(StandbyAttachment {
            manager: self,
            standby: standby.clone(),
            ctx,
        })
    }

    /// Grant `standby` replication access on `primary`, then rebuild it as a
    /// standby of `primary`.
    ///
    /// Safe to repeat: the grant is only appended when missing.
    #[tracing::instrument(skip_all, fields(operation_id = %Uuid::new_v4(), primary = %primary, standby = %standby))]
    pub async fn attach_standby(
        &self,
        primary: &Host,
        standby: &Host,
        version: &str,
        cluster_name: &str,
        port: u16,
    ) -> Result<AttachReport> {
        let plan = self.plan_attach(primary, standby, version, cluster_name, port)?;
        plan.authorize().await?.provision().await
    }

    /// Promote the standby on `node` to primary.
    ///
    /// Only `node` is contacted. Other standbys of the old primary must be
    /// re-attached with [`TopologyManager::attach_standby`] afterwards.
    #[tracing::instrument(skip_all, fields(operation_id = %Uuid::new_v4(), node = %node))]
    pub async fn promote(
        &self,
        node: &Host,
        version: &str,
        cluster_name: &str,
        options: &PromoteOptions,
    ) -> Result<Node> {
        let ctx = self.context(node, None, version, cluster_name, DEFAULT_PORT)?;
        if options.push_key {
            self.credentials
                .push_key(node, &options.key_path, options.generate_key)
                .await?;
        }

        let promote = RemoteCommand::from_path(&ctx.paths().pg_ctl())
            .arg("-D")
            .arg(format!("{}/", ctx.paths().data_dir.display()))
            .arg("promote");
        let target = Target::as_user(node, ctx.service_user());
        tracing::info!(%target, "promoting standby");
        self.executor
            .run(&target, &promote, ExecMode::Checked)
            .await?;
        Ok(Node::primary(node, &ctx))
    }

    /// Push the operator key to the service account on `host`.
    #[tracing::instrument(skip_all, fields(operation_id = %Uuid::new_v4(), host = %host))]
    pub async fn push_key(&self, host: &Host, key_path: &Path, generate: bool) -> Result<()> {
        self.credentials.push_key(host, key_path, generate).await
    }
}

/// Phase one of an attach: nothing has touched either host yet.
pub struct StandbyAttachment<'a> {
    manager: &'a TopologyManager,
    standby: Host,
    ctx: ConfigContext,
}

impl<'a> StandbyAttachment<'a> {
    /// The exact `pg_hba.conf` line this attach needs on the primary.
    pub fn authorization_entry(&self) -> Result<String> {
        let entry = self
            .manager
            .templates
            .render(TemplateKind::HbaEntry, &self.ctx.template_vars())?;
        Ok(entry.trim().to_string())
    }

    /// Ensure the primary authorizes the standby, reloading it if the entry
    /// had to be added.
    pub async fn authorize(self) -> Result<AuthorizedStandby<'a>> {
        let executor = &self.manager.executor;
        let primary = Target::admin(self.ctx.primary());
        let hba = self.ctx.paths().pg_hba_conf();
        let entry = self.authorization_entry()?;

        let probe = RemoteCommand::new("grep")
            .arg("-qxF")
            .arg("--")
            .arg(entry.as_str())
            .path_arg(&hba);
        let found = executor.run(&primary, &probe, ExecMode::BestEffort).await?;
        let outcome = match found.status {
            0 => AuthorizationOutcome::AlreadyPresent,
            1 => {
                let append = RemoteCommand::new("tee")
                    .arg("-a")
                    .path_arg(&hba)
                    .stdin(format!("\n{entry}\n"));
                executor.run(&primary, &append, ExecMode::Checked).await?;

                let reload = RemoteCommand::new("pg_ctlcluster")
                    .arg(self.ctx.version().to_string())
                    .arg(self.ctx.cluster_name())
                    .arg("reload");
                executor.run(&primary, &reload, ExecMode::Checked).await?;
                AuthorizationOutcome::Appended
            }
            status => {
                return Err(ExecError::CommandFailed {
                    host: primary.host.to_string(),
                    command: probe.to_shell(),
                    status,
                    stderr: found.stderr.trim_end().to_string(),
                }
                .into())
            }
        };
        tracing::info!(primary = %primary.host, standby = %self.standby, ?outcome, "replication access granted");

        Ok(AuthorizedStandby {
            manager: self.manager,
            standby: self.standby,
            ctx: self.ctx,
            authorization: outcome,
        })
    }
}

/// Phase two of an attach: the primary already accepts the standby.
pub struct AuthorizedStandby<'a> {
    manager: &'a TopologyManager,
    standby: Host,
    ctx: ConfigContext,
    authorization: AuthorizationOutcome,
}

impl AuthorizedStandby<'_> {
    /// What phase one did on the primary.
    pub fn authorization(&self) -> AuthorizationOutcome {
        self.authorization
    }

    /// Rebuild the standby from a base backup of the primary.
    ///
    /// A failure here leaves the phase one grant in place; re-running the
    /// attach skips it.
    pub async fn provision(self) -> Result<AttachReport> {
        let reset = self
            .manager
            .provisioner
            .provision(&self.ctx, &self.standby, true)
            .await?;
        Ok(AttachReport {
            primary: Node::primary(self.ctx.primary(), &self.ctx),
            standby: Node::standby(&self.standby, &self.ctx),
            authorization: self.authorization,
            reset_declined: reset == ResetOutcome::Declined,
        })
    }
}
