//! Land Registry CLI
//!
//! Command-line interface for the land registry server: property
//! registration and the multi-signature transfer lifecycle.

mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

use crate::client::RegistryClient;

/// Land registry CLI - manage properties and multi-signature transfers.
#[derive(Parser, Debug)]
#[command(name = "landreg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registry server URL.
    #[arg(long, env = "REGISTRY_URL", default_value = "http://localhost:4000", global = true)]
    registry: String,

    /// Principal to act as (forwarded in the x-principal header).
    #[arg(long, env = "REGISTRY_PRINCIPAL", global = true)]
    principal: Option<String>,

    /// API pre-shared key, if the server requires one.
    #[arg(long, env = "REGISTRY_API_PSK", global = true)]
    api_key: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Property registry operations.
    #[command(subcommand)]
    Property(PropertyCommands),

    /// Multi-signature transfer operations.
    #[command(subcommand)]
    Transfer(TransferCommands),
}

#[derive(Subcommand, Debug)]
enum PropertyCommands {
    /// Register a new property under your principal.
    Register {
        /// Property identifier (e.g. a cadastral number).
        #[arg(short, long)]
        id: String,

        /// Human-readable location.
        #[arg(short, long)]
        location: String,

        /// Area in square meters.
        #[arg(short, long)]
        area: u64,
    },

    /// List all registered properties.
    List,

    /// Show a single property.
    Show {
        /// Property identifier.
        #[arg(short, long)]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum TransferCommands {
    /// Initiate a multi-signature transfer (owner only).
    Initiate {
        /// Property identifier.
        #[arg(short, long)]
        id: String,

        /// Principal the property transfers to.
        #[arg(short, long)]
        to: String,

        /// Principals whose signatures are required (repeatable).
        #[arg(short, long = "signer", required = true)]
        signers: Vec<String>,

        /// Signing window in days (1-30, default 30).
        #[arg(short, long)]
        window_days: Option<u32>,
    },

    /// Sign the pending transfer for a property.
    Sign {
        /// Property identifier.
        #[arg(short, long)]
        id: String,

        /// Authorization token from your wallet.
        #[arg(short, long)]
        token: String,
    },

    /// Cancel the pending transfer (initiator or owner only).
    Cancel {
        /// Property identifier.
        #[arg(short, long)]
        id: String,
    },

    /// Show the latest transfer for a property.
    Status {
        /// Property identifier.
        #[arg(short, long)]
        id: String,
    },

    /// Show all transfers ever proposed for a property.
    History {
        /// Property identifier.
        #[arg(short, long)]
        id: String,
    },

    /// List completed or cancelled transfers awaiting ledger
    /// confirmation.
    Unconfirmed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::TRACE
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();

    let client = RegistryClient::new(cli.registry, cli.principal, cli.api_key)?;

    match cli.command {
        Commands::Property(cmd) => match cmd {
            PropertyCommands::Register { id, location, area } => {
                commands::register_property(&client, &id, &location, area).await?;
            }
            PropertyCommands::List => {
                commands::list_properties(&client).await?;
            }
            PropertyCommands::Show { id } => {
                commands::show_property(&client, &id).await?;
            }
        },
        Commands::Transfer(cmd) => match cmd {
            TransferCommands::Initiate {
                id,
                to,
                signers,
                window_days,
            } => {
                commands::initiate_transfer(&client, &id, &to, signers, window_days).await?;
            }
            TransferCommands::Sign { id, token } => {
                commands::sign_transfer(&client, &id, &token).await?;
            }
            TransferCommands::Cancel { id } => {
                commands::cancel_transfer(&client, &id).await?;
            }
            TransferCommands::Status { id } => {
                commands::transfer_status(&client, &id).await?;
            }
            TransferCommands::History { id } => {
                commands::transfer_history(&client, &id).await?;
            }
            TransferCommands::Unconfirmed => {
                commands::unconfirmed_transfers(&client).await?;
            }
        },
    }

    Ok(())
}
