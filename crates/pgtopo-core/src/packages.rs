//! Package installation on managed hosts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::RemoteCommand;
use crate::context::{Host, PgVersion};
use crate::error::{ExecError, PackageError};
use crate::executor::{ExecMode, RemoteExecutor, Target};
use crate::template::{TemplateKind, TemplateSet};

const APT_SOURCE_LIST: &str = "/etc/apt/sources.list.d/postgresql.list";
const PGDG_KEY_URL: &str = "http://apt.postgresql.org/pub/repos/apt/ACCC4CF8.asc";
const IMPORT_KEY_SCRIPT: &str = r#"wget --quiet -O - "$1" | apt-key add -"#;

/// The packages a node needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSet {
    /// PostgreSQL server version the packages are built for.
    pub version: PgVersion,
    /// Also install repmgr tooling.
    pub with_repmgr: bool,
}

impl PackageSet {
    /// Server, client library, headers, contrib and auth libraries.
    pub fn base(version: PgVersion) -> Self {
        Self {
            version,
            with_repmgr: false,
        }
    }

    /// Add the replication manager packages.
    pub fn with_repmgr(mut self, enabled: bool) -> Self {
        self.with_repmgr = enabled;
        self
    }

    /// Concrete Debian package names.
    pub fn package_names(&self) -> Vec<String> {
        let v = self.version;
        let mut names = vec![
            format!("postgresql-{v}"),
            "libpq-dev".to_string(),
            format!("postgresql-server-dev-{v}"),
            format!("postgresql-contrib-{v}"),
            "libxslt-dev".to_string(),
            "libxml2-dev".to_string(),
            "libpam-dev".to_string(),
            "libedit-dev".to_string(),
        ];
        if self.with_repmgr {
            names.extend([
                "repmgr".to_string(),
                "repmgr-dbg".to_string(),
                format!("postgresql-{v}-repmgr"),
            ]);
        }
        names
    }
}

/// Installs a [`PackageSet`] on a host.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install `packages` on `host`. Any failure is fatal.
    async fn install(&self, host: &Host, packages: &PackageSet) -> Result<(), PackageError>;
}

/// apt-based installer using the PGDG repository.
pub struct AptInstaller {
    executor: Arc<dyn RemoteExecutor>,
    templates: Arc<TemplateSet>,
    distribution: String,
    proxy: Option<String>,
}

impl AptInstaller {
    /// Create an installer for the given Debian distribution codename.
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        templates: Arc<TemplateSet>,
        distribution: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            templates,
            distribution: distribution.into(),
            proxy: None,
        }
    }

    /// Fetch the signing key through an HTTP proxy.
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    async fn step(
        &self,
        step: &'static str,
        target: &Target,
        command: RemoteCommand,
    ) -> Result<(), PackageError> {
        tracing::debug!(host = %target.host, step, command = %command, "package step");
        self.executor
            .run(target, &command, ExecMode::Checked)
            .await
            .map(|_| ())
            .map_err(|source| PackageError::Step {
                step,
                host: target.host.to_string(),
                source,
            })
    }

    async fn ensure_source_list(&self, target: &Target) -> Result<(), PackageError> {
        let probe = RemoteCommand::new("test").arg("-e").arg(APT_SOURCE_LIST);
        let exists = self
            .executor
            .run(target, &probe, ExecMode::BestEffort)
            .await
            .map_err(|source| PackageError::Step {
                step: "probe source list",
                host: target.host.to_string(),
                source,
            })?
            .success();
        if exists {
            return Ok(());
        }

        let mut vars = BTreeMap::new();
        vars.insert("distribution".to_string(), self.distribution.clone());
        let content = self.templates.render(TemplateKind::AptSourceList, &vars)?;
        self.executor
            .upload(target, &content, Path::new(APT_SOURCE_LIST))
            .await
            .map_err(|source: ExecError| PackageError::Step {
                step: "upload source list",
                host: target.host.to_string(),
                source,
            })
    }
}

#[async_trait]
impl PackageInstaller for AptInstaller {
    async fn install(&self, host: &Host, packages: &PackageSet) -> Result<(), PackageError> {
        let target = Target::admin(host);
        tracing::info!(%host, repmgr = packages.with_repmgr, "installing packages");

        self.ensure_source_list(&target).await?;

        let mut import_key = RemoteCommand::new("sh")
            .arg("-c")
            .arg(IMPORT_KEY_SCRIPT)
            .arg("sh")
            .arg(PGDG_KEY_URL);
        if let Some(proxy) = &self.proxy {
            import_key = import_key.env("http_proxy", proxy.as_str());
        }
        self.step("import signing key", &target, import_key).await?;

        self.step(
            "apt-get update",
            &target,
            RemoteCommand::new("apt-get").arg("update"),
        )
        .await?;

        self.step(
            "apt-get install",
            &target,
            RemoteCommand::new("apt-get")
                .arg("-y")
                .arg("install")
                .args(packages.package_names()),
        )
        .await
    }
}
