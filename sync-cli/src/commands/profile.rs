//! Show or publish profile metadata.

use anyhow::Result;
use nostr_sync_client::{UserStore, MAIN_CHANNEL};
use nostr_sync_core::User;
use nostr_sync_types::{Filter, Kind, ProfileMetadata, PublicKey};
use std::path::Path;
use std::time::Duration;

use super::{collect, connect};

/// Run `profile show`.
///
/// Fetches the latest metadata of `pubkey` (default: me) for `wait`, then
/// prints what the local store holds.
pub async fn show(data_dir: &Path, pubkey: Option<PublicKey>, wait: Duration) -> Result<()> {
    let client = connect(data_dir, wait).await?;
    let target = pubkey.unwrap_or_else(|| client.public_key());

    client
        .pool()
        .subscribe(MAIN_CHANNEL, Filter::new().kind(Kind::METADATA).author(target))
        .await?;
    collect(wait).await;
    client.leave_view().await?;

    let user = client.store().get_user(&target).await?;
    client.shutdown().await;

    match user {
        Some(user) if user.last_metadata_at.is_some() => print_user(&user),
        _ => println!("No profile found for {}", target),
    }
    Ok(())
}

/// Run `profile publish`.
pub async fn publish(data_dir: &Path, metadata: ProfileMetadata, wait: Duration) -> Result<()> {
    if metadata == ProfileMetadata::default() {
        anyhow::bail!("Nothing to publish. Pass at least one of --name, --about, --picture, --lud06");
    }

    let client = connect(data_dir, wait).await?;
    let result = client.publish_profile(&metadata).await;
    client.shutdown().await;

    let outcome = result?;
    println!("Profile published!");
    println!("  Event ID: {}", outcome.event_id);
    println!("  Accepted: {}", outcome.relay);
    if !outcome.message.is_empty() {
        println!("  Message:  {}", outcome.message);
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("Profile {}:", user.id);
    println!("  Name:    {}", user.name.as_deref().unwrap_or("-"));
    println!("  About:   {}", user.about.as_deref().unwrap_or("-"));
    println!("  Picture: {}", user.picture.as_deref().unwrap_or("-"));
    println!("  LUD-06:  {}", user.lud06.as_deref().unwrap_or("-"));
    if let Some(at) = user.last_metadata_at {
        println!("  Updated: {}", super::status::format_timestamp(at));
    }
}
