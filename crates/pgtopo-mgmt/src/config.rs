use pgtopo_core::context::DEFAULT_SERVICE_USER;
use pgtopo_ssh::SshConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pgtopo/pgtopo.toml";

/// Package installation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub install_repmgr: bool,
    pub apt_distribution: String,
    pub proxy: Option<String>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            install_repmgr: false,
            apt_distribution: String::from("wheezy"),
            proxy: None,
        }
    }
}

/// Operator configuration, read from `/etc/pgtopo/pgtopo.toml` by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgTopoConfig {
    pub ssh: SshConfig,
    pub service_user: String,
    pub packages: PackageConfig,
    pub template_dir: Option<PathBuf>,
}

impl Default for PgTopoConfig {
    fn default() -> Self {
        Self {
            ssh: SshConfig::default(),
            service_user: String::from(DEFAULT_SERVICE_USER),
            packages: PackageConfig::default(),
            template_dir: None,
        }
    }
}

impl PgTopoConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: PgTopoConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: PgTopoConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }
}
