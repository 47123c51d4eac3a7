//! HIPAA Chat CLI - command-line front end for the secure chat transport.
//!
//! Useful for headless operation, scripting and debugging: connect to a
//! chat server and watch traffic, manage local key material, and run the
//! message encryption service by hand.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use hc_core::config::{AppConfig, ConfigHandle};
use hc_core::error::HcResult;
use hc_core::logging;

/// HIPAA Chat - secure real-time messaging client.
#[derive(Parser)]
#[command(
    name = "hipaa-chat",
    version,
    about = "HIPAA Chat secure transport CLI",
    long_about = "A command-line interface for the HIPAA Chat client transport.\n\
                   Connect to a chat server, inspect live traffic, and manage message encryption keys."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the chat server and print live traffic until Ctrl+C.
    Connect {
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Bearer token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Save the address to the config file after connecting.
        #[arg(long)]
        save: bool,
    },
    /// Manage local encryption keys.
    Keys {
        #[command(subcommand)]
        action: commands::keys::KeysAction,
    },
    /// Encrypt a JSON message object ("-" reads stdin).
    Encrypt {
        message: String,
    },
    /// Decrypt a JSON message envelope ("-" reads stdin).
    Decrypt {
        message: String,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> HcResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = logging::init_logging(log_level, &log_dir, config.logging.json_output)?;

    info!("HIPAA Chat CLI v{}", hc_core::constants::APP_VERSION);

    let config_handle = ConfigHandle::new(config);

    // Dispatch to command handlers
    match cli.command {
        Commands::Connect { address, token, save } => {
            commands::connect::run(config_handle, &config_path, address, token, save, cli.format).await
        }
        Commands::Keys { action } => {
            commands::keys::run(config_handle, action, cli.format).await
        }
        Commands::Encrypt { message } => {
            commands::crypto::encrypt(config_handle, &message, cli.format).await
        }
        Commands::Decrypt { message } => {
            commands::crypto::decrypt(config_handle, &message, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
