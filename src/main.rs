//! Clockwork - persistent job-scheduling daemon.
//!
//! Main entry point for the clockwork CLI and server.

mod cli;
mod server;

use clap::Parser;
use tracing::warn;

use clockwork_config::{Config, ConfigLoader};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    server::init_tracing()?;

    let cli = Cli::parse();

    let config = ConfigLoader::load(&cli.config).unwrap_or_else(|e| {
        warn!("failed to load config from {:?}: {e}, using defaults", cli.config);
        Config::default()
    });

    match cli.command {
        None => server::run_server(config).await,
        Some(Commands::Run { host, port }) => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::run_server(config).await
        }
        Some(Commands::CheckConfig) => server::check_config(config),
    }
}
