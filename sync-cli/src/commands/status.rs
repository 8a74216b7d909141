//! Show identity, local data and relay status.

use anyhow::Result;
use nostr_sync_client::{Client, UserFilter, UserStore, WebSocketConnector};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{database_path, load_client_config, IdentityConfig};

/// Run the status command.
///
/// With `wait` set, also connects and reports each relay's state.
pub async fn run(data_dir: &Path, wait: Option<Duration>) -> Result<()> {
    println!("=== nostr-sync status ===");
    println!();

    // Check identity
    let identity = match IdentityConfig::load(data_dir).await {
        Ok(identity) => {
            println!("Identity:");
            println!("  Public key: {}", identity.public_key);
            println!("  Created:    {}", format_timestamp(identity.created_at));
            identity
        }
        Err(_) => {
            println!("Identity: NOT INITIALIZED");
            println!();
            println!("Run 'nostr-sync init --relay <url>' to initialize.");
            return Ok(());
        }
    };

    println!();

    let config = load_client_config(data_dir)?;
    println!("Relays: {} configured", config.relays.len());
    for relay in &config.relays {
        println!("  {}", relay);
    }

    println!();

    // Local projection
    if database_path(data_dir).exists() {
        let store = super::open_store(data_dir).await?;
        let all = store.list_users(UserFilter::All).await?.len();
        let contacts = store.list_users(UserFilter::Contacts).await?.len();
        let followers = store.list_users(UserFilter::Followers).await?.len();
        println!("Local data:");
        println!("  Users:     {}", all);
        println!("  Following: {}", contacts);
        println!("  Followers: {}", followers);
    } else {
        println!("Local data: EMPTY");
    }

    let Some(wait) = wait else {
        return Ok(());
    };
    if config.relays.is_empty() {
        return Ok(());
    }

    println!();
    let store = Arc::new(super::open_store(data_dir).await?);
    let client = Client::start(&config, WebSocketConnector, store, identity.keys()?)?;
    client.pool().wait_for_open(wait).await;

    println!("Connection:");
    for status in client.pool().relay_states().await? {
        println!("  {:<40} {}", status.url.as_str(), status.state.label());
    }
    client.shutdown().await;

    Ok(())
}

/// Format a Unix timestamp as a human-readable string.
pub fn format_timestamp(ts: u64) -> String {
    let diff = nostr_sync_types::unix_now().saturating_sub(ts);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
