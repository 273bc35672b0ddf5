//! Structured remote commands.
//!
//! A [`RemoteCommand`] keeps the fixed program name apart from its
//! parameters. Rendering quotes every element on its own, so a host name,
//! path or key can never change the shape of the command line.

use std::fmt;
use std::path::Path;

/// A command to run on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    env: Vec<(String, String)>,
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
}

impl RemoteCommand {
    /// Start a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            env: Vec::new(),
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Start a command for a program given by absolute path.
    pub fn from_path(program: &Path) -> Self {
        Self::new(program.display().to_string())
    }

    /// Append one literal argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Append several literal arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for this command only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `input` to the command's standard input.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in order.
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Standard input payload, if any.
    pub fn stdin_payload(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Render as a POSIX shell command line with every element quoted.
    pub fn to_shell(&self) -> String {
        let mut out = Vec::with_capacity(self.args.len() + self.env.len() + 2);
        if !self.env.is_empty() {
            out.push("env".to_string());
            for (k, v) in &self.env {
                out.push(quote(&format!("{k}={v}")));
            }
        }
        out.push(quote(&self.program));
        out.extend(self.args.iter().map(|a| quote(a)));
        out.join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Single-quote `s` for a POSIX shell.
///
/// Plain words made only of safe characters are left bare to keep logs
/// readable.
pub fn quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | ',' | '+' | '@'));
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
