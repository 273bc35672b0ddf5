//! Brings one host to a running PostgreSQL service as primary or standby.

use std::sync::Arc;

use crate::command::RemoteCommand;
use crate::context::{ConfigContext, Host};
use crate::error::Result;
use crate::executor::{Confirm, ExecMode, RemoteExecutor, Target};
use crate::packages::{PackageInstaller, PackageSet};
use crate::template::{TemplateKind, TemplateSet};

const INIT_SCRIPT: &str = "/etc/init.d/postgresql";

/// What happened to the data directory during a provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Primary provision; no reset was considered.
    NotRequested,
    /// The operator declined; existing data was left in place.
    Declined,
    /// Data was wiped, restored from a base backup and linked to the primary.
    Restored,
}

/// Provisions a single node.
pub struct NodeProvisioner {
    executor: Arc<dyn RemoteExecutor>,
    installer: Arc<dyn PackageInstaller>,
    confirm: Arc<dyn Confirm>,
    templates: Arc<TemplateSet>,
    install_repmgr: bool,
}

impl NodeProvisioner {
    /// Create a provisioner over the given collaborators.
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        installer: Arc<dyn PackageInstaller>,
        confirm: Arc<dyn Confirm>,
        templates: Arc<TemplateSet>,
    ) -> Self {
        Self {
            executor,
            installer,
            confirm,
            templates,
            install_repmgr: false,
        }
    }

    /// Also install repmgr tooling on every provisioned node.
    pub fn with_repmgr(mut self, enabled: bool) -> Self {
        self.install_repmgr = enabled;
        self
    }

    /// Provision `host` under `ctx`.
    ///
    /// Package installation and the configuration upload are fatal. For a
    /// standby the operator must confirm before the data directory is wiped;
    /// declining skips the wipe, backup and recovery file but ownership and
    /// restart still run.
    pub async fn provision(
        &self,
        ctx: &ConfigContext,
        host: &Host,
        is_standby: bool,
    ) -> Result<ResetOutcome> {
        let target = Target::admin(host);
        let paths = ctx.paths();
        tracing::info!(%host, standby = is_standby, cluster = ctx.cluster_name(), version = %ctx.version(), "provisioning node");

        let packages = PackageSet::base(ctx.version()).with_repmgr(self.install_repmgr);
        self.installer.install(host, &packages).await?;

        let conf = self
            .templates
            .render(TemplateKind::PostgresqlConf, &ctx.template_vars())?;
        self.executor
            .upload(&target, &conf, &paths.postgresql_conf())
            .await?;

        let outcome = if is_standby {
            self.reset_from_primary(ctx, &target).await?
        } else {
            ResetOutcome::NotRequested
        };

        for dir in [&paths.data_dir, &paths.config_dir] {
            let chown = RemoteCommand::new("chown")
                .arg("-R")
                .arg(ctx.owner_spec())
                .path_arg(dir);
            self.run(&target, chown, ExecMode::Checked).await?;
        }

        self.restart(&target).await?;
        tracing::info!(%host, ?outcome, "node provisioned");
        Ok(outcome)
    }

    async fn reset_from_primary(
        &self,
        ctx: &ConfigContext,
        target: &Target,
    ) -> Result<ResetOutcome> {
        let paths = ctx.paths();

        let listing = RemoteCommand::new("su")
            .arg("-")
            .arg(ctx.service_user())
            .arg("-c")
            .arg("psql -l");
        let listing = match self.executor.run(target, &listing, ExecMode::BestEffort).await {
            Ok(out) if out.success() => out.stdout,
            Ok(out) => {
                tracing::warn!(host = %target.host, status = out.status, "database listing failed");
                format!("{}{}", out.stdout, out.stderr)
            }
            Err(e) => {
                tracing::warn!(host = %target.host, error = %e, "database listing failed");
                e.to_string()
            }
        };

        let prompt = format!(
            "This will destroy your $PGDATA files on host {}.\n\
             Your DBMS is set up as follows:\n{}\n\
             Are you sure you want to continue?",
            target.host,
            listing.trim_end()
        );
        if !self.confirm.confirm(&prompt) {
            tracing::warn!(host = %target.host, "data directory reset declined; keeping existing data");
            return Ok(ResetOutcome::Declined);
        }

        let stop = RemoteCommand::new("pg_ctlcluster")
            .arg(ctx.version().to_string())
            .arg(ctx.cluster_name())
            .arg("stop");
        self.run(target, stop, ExecMode::BestEffort).await?;

        let wipe = RemoteCommand::new("find")
            .path_arg(&paths.data_dir)
            .args(["-mindepth", "1", "-delete"]);
        self.run(target, wipe, ExecMode::Checked).await?;

        let backup = RemoteCommand::new("pg_basebackup")
            .arg("-D")
            .path_arg(&paths.data_dir)
            .arg("-U")
            .arg(ctx.service_user())
            .arg("-h")
            .arg(ctx.primary().bare())
            .arg("-p")
            .arg(ctx.port().to_string());
        tracing::info!(host = %target.host, primary = %ctx.primary(), "taking base backup");
        self.run(target, backup, ExecMode::Checked).await?;

        let recovery = self
            .templates
            .render(TemplateKind::RecoveryConf, &ctx.template_vars())?;
        self.executor
            .upload(target, &recovery, &paths.recovery_conf())
            .await?;

        Ok(ResetOutcome::Restored)
    }

    async fn restart(&self, target: &Target) -> Result<()> {
        self.run(target, RemoteCommand::new(INIT_SCRIPT).arg("stop"), ExecMode::BestEffort)
            .await?;
        self.run(target, RemoteCommand::new(INIT_SCRIPT).arg("start"), ExecMode::Checked)
            .await
    }

    async fn run(&self, target: &Target, command: RemoteCommand, mode: ExecMode) -> Result<()> {
        tracing::debug!(host = %target.host, command = %command, "remote");
        let out = self.executor.run(target, &command, mode).await?;
        if !out.success() {
            tracing::warn!(host = %target.host, status = out.status, command = %command, stderr = out.stderr.trim_end(), "tolerated failure");
        }
        Ok(())
    }
}
