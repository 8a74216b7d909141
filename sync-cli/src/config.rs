//! Configuration management for nostr-sync.
//!
//! The data directory holds three files:
//! - `identity.json`: the secret key (mode 0600)
//! - `config.toml`: relays and engine tuning ([`ClientConfig`])
//! - `users.db`: the local User projection

use anyhow::{Context, Result};
use nostr_sync_client::{ClientConfig, Keys};
use nostr_sync_types::unix_now;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const IDENTITY_FILE: &str = "identity.json";
const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "users.db";

/// Identity stored locally.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Hex-encoded secret key.
    pub secret_key: String,
    /// Hex-encoded x-only public key.
    pub public_key: String,
    /// When the identity was created.
    pub created_at: u64,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("secret_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl IdentityConfig {
    /// Capture an identity for saving.
    pub fn from_keys(keys: &Keys) -> Self {
        Self {
            secret_key: keys.secret_hex().to_string(),
            public_key: keys.public_key().to_hex(),
            created_at: unix_now(),
        }
    }

    /// Rebuild the signing keys.
    pub fn keys(&self) -> Result<Keys> {
        let keys = Keys::from_secret_hex(&self.secret_key).context("Invalid secret key")?;
        if keys.public_key().to_hex() != self.public_key {
            anyhow::bail!("Identity file is inconsistent: public key does not match secret key");
        }
        Ok(keys)
    }

    /// Load the identity from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(IDENTITY_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Identity not initialized. Run 'nostr-sync init' first.")?;
        serde_json::from_str(&contents).context("Invalid identity file")
    }

    /// Save the identity to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(IDENTITY_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save identity")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if an identity exists.
    pub async fn exists(data_dir: &Path) -> bool {
        data_dir.join(IDENTITY_FILE).exists()
    }
}

/// Path of the engine configuration file.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Path of the local database.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

/// Load the engine configuration, falling back to defaults when absent.
pub fn load_client_config(data_dir: &Path) -> Result<ClientConfig> {
    let path = config_path(data_dir);
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    ClientConfig::from_file(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Save the engine configuration.
pub async fn save_client_config(data_dir: &Path, config: &ClientConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to encode configuration")?;
    tokio::fs::write(config_path(data_dir), contents)
        .await
        .context("Failed to save configuration")?;
    Ok(())
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
