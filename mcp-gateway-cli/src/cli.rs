//! CLI argument parsing definitions (spec §1: the CLI surface itself is a
//! deliberately thin ambient entry point over the Runtime/Daemon).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML, spec §6 option surface)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the stateful daemon in the foreground
    Serve,

    /// Print the catalog of one configured server
    Catalog {
        /// Name of the server as it appears under `servers` in the config file
        name: String,
    },

    /// Manage the background daemon process
    Daemon {
        #[command(subcommand)]
        daemon_cmd: DaemonCommands,
    },

    /// Run as the detached daemon worker (internal use, spawned by `daemon start`)
    #[command(hide = true)]
    DaemonWorker,
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon as a detached background process if one isn't already running
    Start,

    /// Ask a running daemon to drain and exit
    Stop,

    /// Report whether a daemon is reachable, and its session count
    Status,
}
