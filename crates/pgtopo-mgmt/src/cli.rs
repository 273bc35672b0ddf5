use crate::config::{PgTopoConfig, DEFAULT_CONFIG_PATH};
use crate::confirm::TerminalConfirm;
use crate::guide;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pgtopo_core::{
    AptInstaller, AttachReport, AuthorizationOutcome, Confirm, Host, KeyStore, Node,
    PromoteOptions, RemoteExecutor, StaticConfirm, TemplateSet, TopologyManager,
    DEFAULT_CLUSTER, DEFAULT_KEY_PATH, DEFAULT_PORT, DEFAULT_VERSION,
};
use pgtopo_ssh::{DryRunExecutor, LocalKeyStore, SshExecutor};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pgtopo")]
#[command(about = "PostgreSQL primary/standby replication over SSH", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, env = "PGTOPO_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Answer yes to every confirmation prompt.
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Print the remote steps instead of running them.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Cluster identity shared by the provisioning commands.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ClusterArgs {
    #[arg(long, default_value = DEFAULT_VERSION)]
    pub version: String,

    #[arg(long, default_value = DEFAULT_CLUSTER)]
    pub cluster_name: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// HTTP proxy for fetching the repository signing key.
    #[arg(long)]
    pub proxy: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Install and configure a standalone primary.
    SetupPrimary {
        host: Host,
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Grant replication access on the primary and rebuild a standby from it.
    AttachStandby {
        primary_host: Host,
        standby_host: Host,
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Promote a standby to primary.
    Promote {
        host: Host,
        #[arg(long, default_value = DEFAULT_VERSION)]
        version: String,
        #[arg(long, default_value = DEFAULT_CLUSTER)]
        cluster_name: String,
        /// Push the operator key to the service account first.
        #[arg(long)]
        push_key: bool,
        /// Generate a passphrase-less key pair before pushing it.
        #[arg(long, requires = "push_key")]
        generate_key: bool,
        #[arg(long, default_value = DEFAULT_KEY_PATH)]
        key_path: PathBuf,
    },
    /// Append the operator public key to the service account's authorized_keys.
    PushKey {
        host: Host,
        #[arg(long, default_value = DEFAULT_KEY_PATH)]
        key_path: PathBuf,
        /// Generate a passphrase-less key pair first.
        #[arg(long)]
        generate_key: bool,
    },
    /// Show an operator walkthrough.
    Guide {
        #[arg(default_value = "intro")]
        topic: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let output = self.execute().await?;
        print!("{output}");
        Ok(())
    }

    /// Run the command and return what it writes to stdout.
    ///
    /// Dry-run steps go to stderr, or into the `plan` field with `--json`,
    /// so stdout stays machine-readable.
    pub async fn execute(&self) -> Result<String> {
        if let Command::Guide { topic } = &self.command {
            return Ok(guide::topic(topic).to_string());
        }

        let config = PgTopoConfig::load_or_default(&self.config)?;
        let proxy = match &self.command {
            Command::SetupPrimary { cluster, .. } | Command::AttachStandby { cluster, .. } => {
                cluster.proxy.clone()
            }
            _ => None,
        };
        let dry_run = self.dry_run.then(|| {
            Arc::new(if self.json {
                DryRunExecutor::quiet()
            } else {
                DryRunExecutor::new()
            })
        });
        let manager = self.manager(&config, proxy, dry_run.clone())?;
        let plan = dry_run.as_deref();

        match &self.command {
            Command::SetupPrimary { host, cluster } => {
                let node = manager
                    .setup_primary(host, &cluster.version, &cluster.cluster_name, cluster.port)
                    .await?;
                self.render(&node, describe(&node), plan)
            }
            Command::AttachStandby {
                primary_host,
                standby_host,
                cluster,
            } => {
                let report = manager
                    .attach_standby(
                        primary_host,
                        standby_host,
                        &cluster.version,
                        &cluster.cluster_name,
                        cluster.port,
                    )
                    .await?;
                self.render(&report, describe_attach(&report), plan)
            }
            Command::Promote {
                host,
                version,
                cluster_name,
                push_key,
                generate_key,
                key_path,
            } => {
                let options = PromoteOptions {
                    push_key: *push_key,
                    generate_key: *generate_key,
                    key_path: key_path.clone(),
                };
                let node = manager.promote(host, version, cluster_name, &options).await?;
                let text = format!(
                    "{}\n\nStandbys of the previous primary still follow it.\n\
                     Re-attach each one with: pgtopo attach-standby {} <standby>",
                    describe(&node),
                    host
                );
                self.render(&node, text, plan)
            }
            Command::PushKey {
                host,
                key_path,
                generate_key,
            } => {
                manager.push_key(host, key_path, *generate_key).await?;
                let value = serde_json::json!({ "host": host, "pushed": true });
                let text = format!("Key {} pushed to {}", key_path.display(), host);
                self.render(&value, text, plan)
            }
            Command::Guide { .. } => Ok(String::new()),
        }
    }

    fn manager(
        &self,
        config: &PgTopoConfig,
        proxy: Option<String>,
        dry_run: Option<Arc<DryRunExecutor>>,
    ) -> Result<TopologyManager> {
        let executor: Arc<dyn RemoteExecutor>;
        let keys: Arc<dyn KeyStore>;
        match dry_run {
            Some(dry) => {
                executor = dry.clone();
                keys = dry;
            }
            None => {
                executor = Arc::new(SshExecutor::new(config.ssh.clone()));
                keys = Arc::new(LocalKeyStore::new());
            }
        }

        let confirm: Arc<dyn Confirm> = if self.yes || self.dry_run {
            Arc::new(StaticConfirm(true))
        } else {
            Arc::new(TerminalConfirm)
        };

        let templates = match &config.template_dir {
            Some(dir) => TemplateSet::from_dir(dir)?,
            None => TemplateSet::builtin(),
        };
        let templates = Arc::new(templates);

        let installer = AptInstaller::new(
            executor.clone(),
            templates.clone(),
            config.packages.apt_distribution.clone(),
        )
        .with_proxy(proxy.or_else(|| config.packages.proxy.clone()));

        Ok(
            TopologyManager::new(executor, Arc::new(installer), confirm, keys, templates)
                .with_service_user(config.service_user.clone())?
                .with_repmgr(config.packages.install_repmgr),
        )
    }

    fn render<T: Serialize>(
        &self,
        value: &T,
        text: String,
        plan: Option<&DryRunExecutor>,
    ) -> Result<String> {
        if !self.json {
            return Ok(format!("{text}\n"));
        }
        let mut doc = serde_json::to_value(value)?;
        if let Some(plan) = plan {
            doc = serde_json::json!({ "plan": plan.steps(), "result": doc });
        }
        Ok(format!("{}\n", serde_json::to_string_pretty(&doc)?))
    }
}

fn describe_attach(report: &AttachReport) -> String {
    let mut text = match report.authorization {
        AuthorizationOutcome::Appended => {
            format!("Replication access granted on {}\n", report.primary.address)
        }
        AuthorizationOutcome::AlreadyPresent => {
            format!("Replication access already present on {}\n", report.primary.address)
        }
    };
    text.push_str(&describe(&report.standby));
    if report.reset_declined {
        text.push_str(&format!(
            "\nData directory reset declined: {} kept its previous data and may not be replicating.",
            report.standby.address
        ));
    }
    text
}

fn describe(node: &Node) -> String {
    let mut line = format!(
        "{} {:?} {}/{} port {}",
        node.address, node.role, node.version, node.cluster_name, node.port
    );
    if let Some(primary) = &node.replicates_from {
        line.push_str(&format!(" replicating from {}", primary));
    }
    line
}
