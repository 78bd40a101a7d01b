//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ControllerCommand, ListCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Level-triggered workflow engine for staged, containerised plays
#[derive(Debug, Parser, Clone)]
#[command(name = "stagehand")]
#[command(version = "0.1.0")]
#[command(about = "Runs plays: scenes of parallel frames framed by opening and closing credits", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a play until it finishes
    Run(RunCommand),

    /// Validate a play definition
    Validate(ValidateCommand),

    /// List stored plays
    List(ListCommand),

    /// Show the status of a play
    Status(StatusCommand),

    /// Reconcile every stored play until interrupted
    Controller(ControllerCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
