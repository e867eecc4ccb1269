//! Command-line interface definitions.

use clap::{Parser, Subcommand};

/// Durable, content-addressed ingestion pipeline for images and video.
#[derive(Parser, Debug)]
#[command(name = "media-ingest-core", version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands for the ingestion core.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts the watcher, reconciler, health monitor, and queue workers.
    Run,

    /// Loads configuration from the environment and prints it.
    #[command(name = "show-config")]
    ShowConfig,

    /// Runs a single reconcile pass against the intake directory and exits.
    Reconcile,
}
