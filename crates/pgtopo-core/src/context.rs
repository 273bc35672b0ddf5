//! Per-operation parameters and the paths derived from them.
//!
//! A [`ConfigContext`] is built once at the start of an operation, validated,
//! and then passed by reference to every render and command build. Nothing in
//! it changes while the operation runs.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Root of the per-cluster data directories.
pub const LIB_BASEDIR: &str = "/var/lib/postgresql";
/// Root of the per-cluster configuration directories.
pub const ETC_BASEDIR: &str = "/etc/postgresql";
/// Root of the per-version binary directories.
pub const BIN_BASEDIR: &str = "/usr/lib/postgresql";
/// Default service account.
pub const DEFAULT_SERVICE_USER: &str = "postgres";

/// First version that spells the socket option in the plural.
const PLURAL_SOCKET_CUTOFF: PgVersion = PgVersion { major: 9, minor: 3 };
/// Last major release that reads standby settings from `recovery.conf`.
/// 12 refuses to start with one present and 13 drops `wal_keep_segments`.
const LAST_RECOVERY_CONF_MAJOR: u32 = 11;

/// A validated remote host address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Host(String);

impl Host {
    /// Validate and wrap a host address.
    ///
    /// Rejects empty strings, whitespace, control characters and a leading
    /// `-`, which `ssh` would read as an option.
    pub fn parse(raw: &str) -> Result<Self, ContextError> {
        let invalid = raw.is_empty()
            || raw.starts_with('-')
            || raw.chars().any(|c| c.is_whitespace() || c.is_control())
            || raw.contains(['\'', '"', '`', '$', ';', '|', '&']);
        if invalid {
            return Err(ContextError::InvalidHost {
                host: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without IPv6 brackets, as `ssh` and libpq take it.
    pub fn bare(&self) -> &str {
        self.0
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(&self.0)
    }

    /// The `pg_hba.conf` address field matching exactly this host: a `/32`
    /// or `/128` network for IP literals, the name itself otherwise.
    pub fn hba_address(&self) -> String {
        match self.bare().parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => format!("{ip}/32"),
            Ok(IpAddr::V6(ip)) => format!("{ip}/128"),
            Err(_) => self.bare().to_string(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Host {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Host {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Host> for String {
    fn from(host: Host) -> Self {
        host.0
    }
}

/// PostgreSQL version as `MAJOR.MINOR` (9.x) or `MAJOR` (10 and later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PgVersion {
    major: u32,
    minor: u32,
}

impl PgVersion {
    /// Parse a version string such as `9.3` or `11`.
    ///
    /// Releases after 11 are rejected: their standby setup no longer uses
    /// `recovery.conf`.
    pub fn parse(raw: &str) -> Result<Self, ContextError> {
        let invalid = || ContextError::InvalidVersion {
            version: raw.to_string(),
        };
        let mut parts = raw.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u32>().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() || major == 0 {
            return Err(invalid());
        }
        // 9.x needs its minor component, it names a distinct major release.
        if major < 10 && !raw.contains('.') {
            return Err(invalid());
        }
        if major > LAST_RECOVERY_CONF_MAJOR {
            return Err(invalid());
        }
        Ok(Self { major, minor })
    }

    /// Name of the socket directory option for this version.
    pub fn unix_socket_option(&self) -> &'static str {
        if *self >= PLURAL_SOCKET_CUTOFF {
            "unix_socket_directories"
        } else {
            "unix_socket_directory"
        }
    }
}

impl fmt::Display for PgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.major >= 10 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Filesystem roots derived from `{version, cluster_name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// `$PGDATA` for the cluster.
    pub data_dir: PathBuf,
    /// Directory holding `postgresql.conf` and `pg_hba.conf`.
    pub config_dir: PathBuf,
    /// Directory holding `pg_ctl` and friends.
    pub bin_dir: PathBuf,
}

impl Paths {
    /// Derive the paths for a version and cluster.
    pub fn derive(version: PgVersion, cluster_name: &str) -> Self {
        let version = version.to_string();
        Self {
            data_dir: PathBuf::from(LIB_BASEDIR).join(&version).join(cluster_name),
            config_dir: PathBuf::from(ETC_BASEDIR).join(&version).join(cluster_name),
            bin_dir: PathBuf::from(BIN_BASEDIR).join(&version).join("bin"),
        }
    }

    /// Main server configuration file.
    pub fn postgresql_conf(&self) -> PathBuf {
        self.config_dir.join("postgresql.conf")
    }

    /// Host-based authentication file.
    pub fn pg_hba_conf(&self) -> PathBuf {
        self.config_dir.join("pg_hba.conf")
    }

    /// Standby linkage file.
    pub fn recovery_conf(&self) -> PathBuf {
        self.data_dir.join("recovery.conf")
    }

    /// `pg_ctl` binary for this version.
    pub fn pg_ctl(&self) -> PathBuf {
        self.bin_dir.join("pg_ctl")
    }
}

/// Immutable parameters for one topology operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigContext {
    primary: Host,
    standby: Option<Host>,
    version: PgVersion,
    cluster_name: String,
    port: u16,
    service_user: String,
    paths: Paths,
}

impl ConfigContext {
    /// Build a validated context.
    ///
    /// `standby` is `None` for operations that involve only the primary.
    pub fn new(
        primary: Host,
        standby: Option<Host>,
        version: &str,
        cluster_name: &str,
        port: u16,
    ) -> Result<Self, ContextError> {
        let version = PgVersion::parse(version)?;
        validate_cluster_name(cluster_name)?;
        if port == 0 {
            return Err(ContextError::InvalidPort {
                port: port.to_string(),
            });
        }
        if standby.as_ref() == Some(&primary) {
            return Err(ContextError::SelfReplication {
                host: primary.to_string(),
            });
        }
        Ok(Self {
            primary,
            standby,
            version,
            cluster_name: cluster_name.to_string(),
            port,
            service_user: DEFAULT_SERVICE_USER.to_string(),
            paths: Paths::derive(version, cluster_name),
        })
    }

    /// Replace the service account name.
    pub fn with_service_user(mut self, user: &str) -> Result<Self, ContextError> {
        validate_service_user(user)?;
        self.service_user = user.to_string();
        Ok(self)
    }

    /// Host acting as primary for this operation.
    pub fn primary(&self) -> &Host {
        &self.primary
    }

    /// Host being attached as standby, if any.
    pub fn standby(&self) -> Option<&Host> {
        self.standby.as_ref()
    }

    /// PostgreSQL version.
    pub fn version(&self) -> PgVersion {
        self.version
    }

    /// Cluster name (`main` by default).
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Cluster port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Service account owning the data directory.
    pub fn service_user(&self) -> &str {
        &self.service_user
    }

    /// Version-gated socket directory option name.
    pub fn unix_socket_option(&self) -> &'static str {
        self.version.unix_socket_option()
    }

    /// Derived filesystem paths.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// `user:group` for chown, both set to the service account.
    pub fn owner_spec(&self) -> String {
        format!("{0}:{0}", self.service_user)
    }

    /// Values visible to templates.
    ///
    /// `standby_host` is present only when the context names a standby, so a
    /// template that needs it fails loudly on a primary-only operation.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("primary_host".to_string(), self.primary.bare().to_string());
        if let Some(standby) = &self.standby {
            vars.insert("standby_host".to_string(), standby.bare().to_string());
            vars.insert("standby_cidr".to_string(), standby.hba_address());
        }
        vars.insert("version".to_string(), self.version.to_string());
        vars.insert("cluster_name".to_string(), self.cluster_name.clone());
        vars.insert("port".to_string(), self.port.to_string());
        vars.insert("service_user".to_string(), self.service_user.clone());
        vars.insert(
            "unix_socket_option".to_string(),
            self.unix_socket_option().to_string(),
        );
        vars.insert(
            "data_directory".to_string(),
            self.paths.data_dir.display().to_string(),
        );
        vars.insert(
            "config_directory".to_string(),
            self.paths.config_dir.display().to_string(),
        );
        vars
    }
}

/// Check a service account name: ASCII letters, digits, `_` and `-`, not
/// starting with `-`.
pub fn validate_service_user(user: &str) -> Result<(), ContextError> {
    let valid = !user.is_empty()
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ContextError::InvalidServiceUser {
            user: user.to_string(),
        })
    }
}

fn validate_cluster_name(name: &str) -> Result<(), ContextError> {
    let valid = !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ContextError::InvalidClusterName {
            name: name.to_string(),
        })
    }
}
