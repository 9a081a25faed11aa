//! CLI definitions for clockwork.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Clockwork CLI.
#[derive(Parser)]
#[command(name = "clockwork")]
#[command(about = "Persistent job-scheduling daemon with a REST control plane")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "clockwork.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the server in foreground (default)
    Run {
        /// Override the configured listen host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the configuration file and exit
    CheckConfig,
}
