#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]

//! Main entry point for the Chatline server CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;
use std::path::PathBuf;

/// Main CLI structure for the Chatline server
#[derive(Parser)]
#[command(name = "chatline")]
#[command(about = "Real-time message delivery and history server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Chatline CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind, overriding the configuration file and environment
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config =
        Config::load_config(config, port).context("failed to load configuration")?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
