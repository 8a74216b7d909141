//! CLI command implementations.

pub mod contacts;
pub mod init;
pub mod profile;
pub mod status;

use anyhow::{Context, Result};
use nostr_sync_client::{Client, SqliteStore, WebSocketConnector};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{config_path, database_path, load_client_config, IdentityConfig};

/// Open the local User database.
pub async fn open_store(data_dir: &Path) -> Result<SqliteStore> {
    SqliteStore::new(&database_path(data_dir))
        .await
        .context("Failed to open local database")
}

/// Start a client for the stored identity and wait for a relay to open.
pub async fn connect(data_dir: &Path, wait: Duration) -> Result<Client<SqliteStore>> {
    let identity = IdentityConfig::load(data_dir).await?;
    let config = load_client_config(data_dir)?;
    if config.relays.is_empty() {
        anyhow::bail!(
            "No relays configured. Add some to {}",
            config_path(data_dir).display()
        );
    }

    let store = Arc::new(open_store(data_dir).await?);
    let client = Client::start(&config, WebSocketConnector, store, identity.keys()?)?;

    println!("Connecting to {} relay(s)...", config.relays.len());
    if !client.pool().wait_for_open(wait).await {
        client.shutdown().await;
        anyhow::bail!("No relay reachable within {}s", wait.as_secs());
    }
    Ok(client)
}

/// Let subscriptions collect events for `wait`.
pub async fn collect(wait: Duration) {
    tokio::time::sleep(wait).await;
}
