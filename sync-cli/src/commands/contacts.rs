//! List, follow and unfollow contacts.

use anyhow::Result;
use nostr_sync_client::{Client, ContactsView, SqliteStore, UserFilter, UserStore};
use nostr_sync_core::User;
use nostr_sync_types::PublicKey;
use std::path::Path;
use std::time::Duration;

use super::{collect, connect};

/// Run `contacts`: refresh one side of the follow graph and print it.
pub async fn list(data_dir: &Path, followers: bool, wait: Duration) -> Result<()> {
    let (view, filter, title) = if followers {
        (ContactsView::Followers, UserFilter::Followers, "Followers")
    } else {
        (ContactsView::Following, UserFilter::Contacts, "Following")
    };

    let client = connect(data_dir, wait).await?;
    client.view_contacts(view).await?;
    collect(wait).await;

    // Second pass fetches profiles of newly discovered users
    let users = client.load_users(filter).await?;
    if users.iter().any(User::needs_metadata) {
        collect(wait).await;
    }
    client.leave_view().await?;
    let users = client.store().list_users(filter).await?;
    client.shutdown().await;

    println!("{} ({}):", title, users.len());
    for user in &users {
        println!("  {}  {}", user.id, user.display_name());
    }
    Ok(())
}

/// Load my newest contact list before editing it.
///
/// Publishing a list replaces the old one on every relay, so an edit on top
/// of an unknown list would drop everyone else.
async fn sync_before_edit(
    client: &Client<SqliteStore>,
    new_list: bool,
    wait: Duration,
) -> Result<()> {
    if client.fetch_contact_list(wait).await? {
        return Ok(());
    }
    if !new_list {
        anyhow::bail!(
            "No contact list of yours was found on the relays. \
             Re-run with --new-list to start a new one."
        );
    }
    println!("Starting a new contact list");
    Ok(())
}

/// Run `follow`.
pub async fn follow(
    data_dir: &Path,
    pubkey: PublicKey,
    new_list: bool,
    wait: Duration,
) -> Result<()> {
    let client = connect(data_dir, wait).await?;
    let result = match sync_before_edit(&client, new_list, wait).await {
        Ok(()) => client.add_contact(&pubkey).await.map_err(Into::into),
        Err(e) => Err(e),
    };
    client.shutdown().await;

    let outcome = result?;
    println!("Now following {}", pubkey);
    println!("  Contact list: {} (accepted by {})", outcome.event_id, outcome.relay);
    Ok(())
}

/// Run `unfollow`.
pub async fn unfollow(
    data_dir: &Path,
    pubkey: PublicKey,
    new_list: bool,
    wait: Duration,
) -> Result<()> {
    let client = connect(data_dir, wait).await?;
    let result = match sync_before_edit(&client, new_list, wait).await {
        Ok(()) => client.remove_contact(&pubkey).await.map_err(Into::into),
        Err(e) => Err(e),
    };
    client.shutdown().await;

    let outcome = result?;
    println!("No longer following {}", pubkey);
    println!("  Contact list: {} (accepted by {})", outcome.event_id, outcome.relay);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn list_without_identity_fails() {
        let dir = tempdir().unwrap();
        let err = list(dir.path(), false, Duration::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("init"));
    }

    #[tokio::test]
    async fn follow_without_identity_fails() {
        let dir = tempdir().unwrap();
        let result = follow(
            dir.path(),
            PublicKey::from_bytes([1; 32]),
            false,
            Duration::ZERO,
        )
        .await;
        assert!(result.is_err());
    }
}
