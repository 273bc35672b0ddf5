//! Configuration templates.
//!
//! Templates use `{{ name }}` placeholders. Every placeholder must have a
//! value; there are no defaults, conditionals or escapes.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::TemplateError;

/// The templates pgtopo renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// `postgresql.conf`, pushed to every node.
    PostgresqlConf,
    /// `recovery.conf`, pushed to standbys after the base backup.
    RecoveryConf,
    /// One `pg_hba.conf` line granting replication to a standby.
    HbaEntry,
    /// apt source list for the PGDG repository.
    AptSourceList,
}

impl TemplateKind {
    /// All kinds, in a fixed order.
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::PostgresqlConf,
        TemplateKind::RecoveryConf,
        TemplateKind::HbaEntry,
        TemplateKind::AptSourceList,
    ];

    /// File name looked up in an override directory.
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKind::PostgresqlConf => "postgresql.conf",
            TemplateKind::RecoveryConf => "recovery.conf",
            TemplateKind::HbaEntry => "pg_hba.entry",
            TemplateKind::AptSourceList => "postgresql.list",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            TemplateKind::PostgresqlConf => include_str!("../templates/postgresql.conf"),
            TemplateKind::RecoveryConf => include_str!("../templates/recovery.conf"),
            TemplateKind::HbaEntry => include_str!("../templates/pg_hba.entry"),
            TemplateKind::AptSourceList => include_str!("../templates/postgresql.list"),
        }
    }
}

/// Built-in templates with optional per-file overrides.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    overrides: HashMap<TemplateKind, String>,
}

impl TemplateSet {
    /// Only the built-in templates.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-ins, replaced by any same-named file found in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut overrides = HashMap::new();
        for kind in TemplateKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| TemplateError::Load {
                template: kind.file_name().to_string(),
                path: path.clone(),
                reason: e.to_string(),
            })?;
            tracing::debug!(template = kind.file_name(), path = %path.display(), "using template override");
            overrides.insert(kind, text);
        }
        Ok(Self { overrides })
    }

    /// Template source for `kind`.
    pub fn source(&self, kind: TemplateKind) -> &str {
        self.overrides
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.builtin())
    }

    /// Render `kind` with `vars`.
    pub fn render(
        &self,
        kind: TemplateKind,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        render(kind.file_name(), self.source(kind), vars)
    }
}

/// Substitute every `{{ name }}` in `source`.
pub fn render(
    name: &str,
    source: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut consumed = 0;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| TemplateError::Unterminated {
            template: name.to_string(),
            offset: consumed + open,
        })?;
        let field = after[..close].trim();
        let value = vars.get(field).ok_or_else(|| TemplateError::MissingField {
            template: name.to_string(),
            field: field.to_string(),
        })?;
        out.push_str(value);
        let advance = open + 2 + close + 2;
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);
    Ok(out)
}
