//! # sync-cli
//!
//! CLI tool for the nostr-sync engine.
//!
//! ## Commands
//!
//! - `init`: Create or import an identity and choose relays
//! - `status`: Show identity, local data and relay status
//! - `profile show`: Fetch and print profile metadata
//! - `profile publish`: Publish my profile metadata
//! - `contacts`: List who I follow (or who follows me)
//! - `follow` / `unfollow`: Edit my contact list
//!
//! ## Example
//!
//! ```bash
//! # Initialize identity with two relays
//! nostr-sync init --relay wss://relay.damus.io --relay wss://nos.lol
//!
//! # Publish a profile
//! nostr-sync profile publish --name alice --about "hello"
//!
//! # Follow someone and list followers
//! nostr-sync follow <hex-pubkey>
//! nostr-sync contacts --followers
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nostr_sync_types::{ProfileMetadata, PublicKey};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{contacts, init, profile, status};

/// CLI tool for the nostr-sync engine.
#[derive(Parser, Debug)]
#[command(name = "nostr-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for identity, configuration and local data
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Seconds to wait for relays to connect and send data
    #[arg(long, global = true, default_value = "3")]
    wait_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create (or import) an identity
    Init {
        /// Relay URL (ws:// or wss://), repeatable
        #[arg(long = "relay", short)]
        relays: Vec<String>,

        /// Import this hex secret key instead of generating one
        #[arg(long)]
        secret: Option<String>,
    },

    /// Show identity, local data and relay status
    Status {
        /// Also connect and report each relay's state
        #[arg(long)]
        check: bool,
    },

    /// Show or publish profile metadata
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// List who I follow, or who follows me
    Contacts {
        /// Show followers instead of the people I follow
        #[arg(long)]
        followers: bool,
    },

    /// Follow a user and publish my contact list
    Follow {
        /// Hex public key
        pubkey: PublicKey,

        /// Start a new contact list when none is found on the relays
        #[arg(long)]
        new_list: bool,
    },

    /// Unfollow a user and publish my contact list
    Unfollow {
        /// Hex public key
        pubkey: PublicKey,

        /// Start a new contact list when none is found on the relays
        #[arg(long)]
        new_list: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Fetch and print a profile
    Show {
        /// Whose profile (default: mine)
        #[arg(long)]
        pubkey: Option<PublicKey>,
    },

    /// Publish my profile
    Publish {
        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Free-form bio
        #[arg(long)]
        about: Option<String>,

        /// Avatar URL
        #[arg(long)]
        picture: Option<String>,

        /// LNURL for lightning tips
        #[arg(long)]
        lud06: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides; invalid values fall back to info
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let wait = Duration::from_secs(cli.wait_secs);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config::set_dir_permissions_0700(&data_dir).await?;
    tracing::debug!("Using data dir {}", data_dir.display());

    match cli.command {
        Commands::Init { relays, secret } => {
            init::run(&data_dir, &relays, secret.as_deref()).await?;
        }
        Commands::Status { check } => {
            status::run(&data_dir, check.then_some(wait)).await?;
        }
        Commands::Profile { action } => match action {
            ProfileAction::Show { pubkey } => {
                profile::show(&data_dir, pubkey, wait).await?;
            }
            ProfileAction::Publish {
                name,
                about,
                picture,
                lud06,
            } => {
                let metadata = ProfileMetadata {
                    name,
                    about,
                    picture,
                    lud06,
                };
                profile::publish(&data_dir, metadata, wait).await?;
            }
        },
        Commands::Contacts { followers } => {
            contacts::list(&data_dir, followers, wait).await?;
        }
        Commands::Follow { pubkey, new_list } => {
            contacts::follow(&data_dir, pubkey, new_list, wait).await?;
        }
        Commands::Unfollow { pubkey, new_list } => {
            contacts::unfollow(&data_dir, pubkey, new_list, wait).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for nostr-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "nostr-sync", "nostr-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
