//! PairChat - Terminal client and signaling relay.
//!
//! This binary:
//! - Runs an interactive two-party chat session in the terminal
//! - Runs the TCP signaling relay both participants register with
//! - Lists configured identities and shows configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// PairChat - Two-party peer-to-peer chat
#[derive(Parser)]
#[command(name = "pairchat")]
#[command(about = "Two-party peer-to-peer chat", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and chat with your counterpart
    Chat {
        /// Login id (defaults to the last login on this machine)
        #[arg(short, long)]
        login: Option<String>,

        /// Password
        #[arg(short, long, env = "PAIRCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run the signaling relay
    Signal {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:7400")]
        bind: String,
    },

    /// List configured identities
    Identities,

    /// Show or modify configuration
    Config {
        /// Key to get or set
        key: Option<String>,
        /// Value to set
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            login,
            password,
            config,
        } => commands::chat::execute(login, password, config).await,
        Commands::Signal { bind } => commands::signal::execute(&bind).await,
        Commands::Identities => commands::identities::execute().await,
        Commands::Config { key, value } => commands::config::execute(key, value).await,
    }
}
