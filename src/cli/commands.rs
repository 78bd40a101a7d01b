//! CLI command definitions

use crate::core::config::SchedulerKind;
use clap::Args;
use std::path::PathBuf;

/// Run a play to completion
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to play YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,

    /// Scheduler backend (overrides the engine config)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerArg>,

    /// Namespace (overrides the play file)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Keep the play in memory only
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a play definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to play YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides to check instantiation with (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List stored plays
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Only plays in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the status of a stored play
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Play name
    pub name: String,

    /// Namespace (defaults to the engine config's)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Reconcile stored plays until interrupted
#[derive(Debug, Args, Clone)]
pub struct ControllerCommand {
    /// Scheduler backend (overrides the engine config)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerArg>,

    /// Number of plays reconciled concurrently
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Scheduler backend argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulerArg {
    Local,
    Cluster,
    Stub,
}

impl From<SchedulerArg> for SchedulerKind {
    fn from(arg: SchedulerArg) -> Self {
        match arg {
            SchedulerArg::Local => SchedulerKind::Local,
            SchedulerArg::Cluster => SchedulerKind::Cluster,
            SchedulerArg::Stub => SchedulerKind::Stub,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
