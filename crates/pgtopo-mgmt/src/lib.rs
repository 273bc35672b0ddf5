#![warn(missing_docs)]

//! pgtopo operator CLI: configuration file, confirmation prompts, walkthroughs, command dispatch

pub mod cli;
pub mod config;
pub mod confirm;
pub mod guide;

pub use config::{PackageConfig, PgTopoConfig};
pub use confirm::TerminalConfirm;
