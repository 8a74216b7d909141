//! Initialize the local identity.

use anyhow::{Context, Result};
use nostr_sync_client::{parse_relay_url, ClientConfig, Keys};
use std::path::Path;

use crate::config::{config_path, save_client_config, IdentityConfig};

/// Run the init command.
///
/// `secret` imports an existing hex secret key instead of generating one.
pub async fn run(data_dir: &Path, relays: &[String], secret: Option<&str>) -> Result<()> {
    // Check if already initialized
    if IdentityConfig::exists(data_dir).await {
        anyhow::bail!(
            "Identity already initialized. Delete {} to reinitialize.",
            data_dir.join("identity.json").display()
        );
    }

    for relay in relays {
        parse_relay_url(relay)?;
    }

    let keys = match secret {
        Some(hex) => Keys::from_secret_hex(hex).context("Invalid secret key")?,
        None => Keys::generate()?,
    };
    let identity = IdentityConfig::from_keys(&keys);
    identity.save(data_dir).await?;

    if !config_path(data_dir).exists() {
        let config = ClientConfig::default().with_relays(relays.iter().cloned());
        save_client_config(data_dir, &config).await?;
    }

    println!("Identity initialized successfully!");
    println!();
    println!("  Public key: {}", identity.public_key);
    println!("  Relays:     {}", relays.len());
    println!("  Data dir:   {}", data_dir.display());
    println!();
    println!("Next steps:");
    if relays.is_empty() {
        println!("  1. Add relays to {}", config_path(data_dir).display());
    } else {
        println!("  1. Check relays: nostr-sync status");
    }
    println!("  2. Publish a profile: nostr-sync profile publish --name <name>");

    Ok(())
}
