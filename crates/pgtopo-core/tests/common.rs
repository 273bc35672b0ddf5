//! In-memory fake cluster shared by the integration tests.
//!
//! `FakeCluster` stands in for every collaborator at once: it runs remote
//! commands against a per-host map of files, installs packages by seeding a
//! default `pg_hba.conf`, answers confirmations and holds local keys. Every
//! interaction is recorded in call order.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgtopo_core::{
    Confirm, CredentialError, ExecError, ExecMode, ExecOutput, Host, KeyStore, PackageError,
    PackageInstaller, PackageSet, RemoteCommand, RemoteExecutor, Target, TemplateSet,
    TopologyManager,
};

pub const DEFAULT_HBA: &str = "local all postgres peer\nhost all all 127.0.0.1/32 md5\n";
pub const OPERATOR_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ operator@workstation";

pub const DATA_DIR: &str = "/var/lib/postgresql/9.3/main";
pub const CONF_DIR: &str = "/etc/postgresql/9.3/main";

/// One recorded interaction.
#[derive(Debug, Clone)]
pub enum Call {
    Run { target: Target, command: RemoteCommand },
    Upload { target: Target, path: PathBuf, content: String },
    Install { host: Host, packages: Vec<String> },
    Confirm { prompt: String },
    GenerateKey { path: PathBuf },
}

impl Call {
    pub fn host(&self) -> Option<&Host> {
        match self {
            Call::Run { target, .. } | Call::Upload { target, .. } => Some(&target.host),
            Call::Install { host, .. } => Some(host),
            _ => None,
        }
    }

    pub fn program(&self) -> Option<&str> {
        match self {
            Call::Run { command, .. } => Some(command.program()),
            _ => None,
        }
    }

    pub fn is_upload_to(&self, suffix: &str) -> bool {
        matches!(self, Call::Upload { path, .. } if path.ends_with(suffix))
    }
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    files: HashMap<String, BTreeMap<PathBuf, String>>,
    fail_programs: HashSet<String>,
    local_keys: HashMap<PathBuf, String>,
}

/// Fake managed hosts plus a fake operator.
pub struct FakeCluster {
    inner: Mutex<Inner>,
    answer: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            answer: AtomicBool::new(true),
        })
    }

    /// Set the operator's answer to destructive prompts.
    pub fn answer(&self, yes: bool) {
        self.answer.store(yes, Ordering::SeqCst);
    }

    /// Make every command whose program ends with `program` exit 1.
    pub fn fail_program(&self, program: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_programs
            .insert(program.to_string());
    }

    /// Preload a local key pair.
    pub fn add_local_key(&self, private: &str, public: &str) {
        self.inner
            .lock()
            .unwrap()
            .local_keys
            .insert(PathBuf::from(private), public.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(host)
            .and_then(|f| f.get(Path::new(path)).cloned())
    }

    pub fn put_file(&self, host: &str, path: &str, content: &str) {
        self.inner
            .lock()
            .unwrap()
            .files
            .entry(host.to_string())
            .or_default()
            .insert(PathBuf::from(path), content.to_string());
    }

    /// Give `host` the `pg_hba.conf` a fresh package install leaves behind.
    pub fn seed_hba(&self, host: &str) {
        self.put_file(host, &format!("{CONF_DIR}/pg_hba.conf"), DEFAULT_HBA);
    }

    /// Rendered command lines issued to `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run { target, command } if target.host.as_str() == host => {
                    Some(command.to_shell())
                }
                _ => None,
            })
            .collect()
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }

    /// Role read back from the files on `host`: `Some(None)` for a primary,
    /// `Some(Some(primary))` for a standby, `None` if never provisioned.
    pub fn replicates_from(&self, host: &str) -> Option<Option<String>> {
        self.file(host, &format!("{CONF_DIR}/postgresql.conf"))?;
        let recovery = self.file(host, &format!("{DATA_DIR}/recovery.conf"));
        Some(recovery.and_then(|text| {
            text.split_whitespace()
                .find_map(|w| w.strip_prefix("'host=").or_else(|| w.strip_prefix("host=")))
                .map(str::to_string)
        }))
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn execute(&self, host: &str, command: &RemoteCommand) -> ExecOutput {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .fail_programs
            .iter()
            .any(|p| command.program().ends_with(p.as_str()))
        {
            return ExecOutput::failed(1, format!("{}: injected failure", command.program()));
        }
        let files = inner.files.entry(host.to_string()).or_default();
        let args = command.arg_list();

        match command.program() {
            "grep" => {
                let (entry, path) = (&args[2], PathBuf::from(&args[3]));
                match files.get(&path) {
                    Some(text) if text.lines().any(|l| l == entry) => ExecOutput::ok(""),
                    Some(_) => ExecOutput::failed(1, ""),
                    None => ExecOutput::failed(2, format!("grep: {}: No such file", path.display())),
                }
            }
            "tee" if args[0] == "-a" => {
                let input = command.stdin_payload().unwrap_or_default();
                files
                    .entry(PathBuf::from(&args[1]))
                    .or_default()
                    .push_str(input);
                ExecOutput::ok(input)
            }
            "test" => {
                if files.contains_key(Path::new(&args[1])) {
                    ExecOutput::ok("")
                } else {
                    ExecOutput::failed(1, "")
                }
            }
            "find" => {
                let dir = PathBuf::from(&args[0]);
                files.retain(|p, _| !(p.starts_with(&dir) && p != &dir));
                ExecOutput::ok("")
            }
            "su" => ExecOutput::ok(
                "                  List of databases\n   Name    |  Owner\n-----------+----------\n postgres  | postgres\n",
            ),
            "pg_ctlcluster" if args[2] == "stop" => {
                ExecOutput::failed(2, "Cluster is not running.")
            }
            program if program.ends_with("/pg_ctl") => {
                let data = PathBuf::from(args[1].trim_end_matches('/'));
                match files.remove(&data.join("recovery.conf")) {
                    Some(text) => {
                        files.insert(data.join("recovery.done"), text);
                        ExecOutput::ok("server promoting\n")
                    }
                    None => ExecOutput::failed(1, "pg_ctl: cannot promote server; server is not in standby mode"),
                }
            }
            _ => ExecOutput::ok(""),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn run(
        &self,
        target: &Target,
        command: &RemoteCommand,
        mode: ExecMode,
    ) -> Result<ExecOutput, ExecError> {
        self.record(Call::Run {
            target: target.clone(),
            command: command.clone(),
        });
        let out = self.execute(target.host.as_str(), command);
        match mode {
            ExecMode::Checked => out.into_checked(target, command),
            ExecMode::BestEffort => Ok(out),
        }
    }

    async fn upload(
        &self,
        target: &Target,
        content: &str,
        remote_path: &Path,
    ) -> Result<(), ExecError> {
        self.record(Call::Upload {
            target: target.clone(),
            path: remote_path.to_path_buf(),
            content: content.to_string(),
        });
        self.put_file(
            target.host.as_str(),
            &remote_path.display().to_string(),
            content,
        );
        Ok(())
    }
}

#[async_trait]
impl PackageInstaller for FakeCluster {
    async fn install(&self, host: &Host, packages: &PackageSet) -> Result<(), PackageError> {
        self.record(Call::Install {
            host: host.clone(),
            packages: packages.package_names(),
        });
        let hba = format!("{CONF_DIR}/pg_hba.conf");
        if self.file(host.as_str(), &hba).is_none() {
            self.put_file(host.as_str(), &hba, DEFAULT_HBA);
        }
        Ok(())
    }
}

impl Confirm for FakeCluster {
    fn confirm(&self, prompt: &str) -> bool {
        self.record(Call::Confirm {
            prompt: prompt.to_string(),
        });
        self.answer.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for FakeCluster {
    async fn generate(&self, key_path: &Path) -> Result<(), CredentialError> {
        self.record(Call::GenerateKey {
            path: key_path.to_path_buf(),
        });
        self.inner
            .lock()
            .unwrap()
            .local_keys
            .insert(key_path.to_path_buf(), OPERATOR_KEY.to_string());
        Ok(())
    }

    async fn read_public(&self, key_path: &Path) -> Result<String, CredentialError> {
        self.inner
            .lock()
            .unwrap()
            .local_keys
            .get(key_path)
            .cloned()
            .ok_or_else(|| CredentialError::ReadPublic {
                path: key_path.to_path_buf(),
                reason: "No such file or directory".to_string(),
            })
    }
}

pub fn host(s: &str) -> Host {
    Host::parse(s).unwrap()
}

/// A manager whose every collaborator is `cluster`.
pub fn manager(cluster: &Arc<FakeCluster>) -> TopologyManager {
    TopologyManager::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        Arc::new(TemplateSet::builtin()),
    )
}
