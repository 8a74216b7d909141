//! The local User projection and its last-write-wins merge rules.
//!
//! Relays deliver events in any order and any number of times. Every rule
//! here compares the event's `created_at` with the timestamp the projection
//! last accepted for that slot, and accepts only if the event is at least as
//! new. Ties go to the incoming event, so replaying the winner is a no-op and
//! the final state does not depend on delivery order.
//!
//! Contact and follower flags are relative to the local identity ("me"):
//! - `contact`: the user is listed in my newest contact list
//! - `follower`: the user's newest contact list lists me

use nostr_sync_types::{Event, ProfileMetadata, PublicKey};
use std::collections::BTreeSet;

/// Outcome of offering an event to a projection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The event was at least as new and its data was taken.
    Applied,
    /// An equal or newer event had already been taken; nothing changed.
    Stale,
}

impl Freshness {
    /// Whether the event was taken.
    pub fn is_applied(&self) -> bool {
        matches!(self, Freshness::Applied)
    }
}

/// Locally projected view of one pubkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// The user's public key.
    pub id: PublicKey,
    /// Display name from metadata.
    pub name: Option<String>,
    /// Bio from metadata.
    pub about: Option<String>,
    /// Avatar URL from metadata.
    pub picture: Option<String>,
    /// LNURL from metadata.
    pub lud06: Option<String>,
    /// Listed in my contact list.
    pub contact: bool,
    /// Lists me in their contact list.
    pub follower: bool,
    /// `created_at` of the metadata event currently applied.
    pub last_metadata_at: Option<u64>,
    /// `created_at` of this user's newest contact list seen.
    pub last_contact_at: Option<u64>,
}

impl User {
    /// A fresh row with no data.
    pub fn new(id: PublicKey) -> Self {
        Self {
            id,
            name: None,
            about: None,
            picture: None,
            lud06: None,
            contact: false,
            follower: false,
            last_metadata_at: None,
            last_contact_at: None,
        }
    }

    /// Offer a metadata event.
    ///
    /// Overwrites every metadata field (absent fields become `None`) when
    /// `created_at` is not older than the metadata already applied.
    pub fn apply_metadata(&mut self, created_at: u64, metadata: &ProfileMetadata) -> Freshness {
        if !is_fresh(self.last_metadata_at, created_at) {
            return Freshness::Stale;
        }
        self.name = metadata.name.clone();
        self.about = metadata.about.clone();
        self.picture = metadata.picture.clone();
        self.lud06 = metadata.lud06.clone();
        self.last_metadata_at = Some(created_at);
        Freshness::Applied
    }

    /// Offer a contact list authored by this user.
    ///
    /// Only records the timestamp; the edges it implies are computed by
    /// [`plan_contact_list`].
    pub fn accept_contact_list(&mut self, created_at: u64) -> Freshness {
        if !is_fresh(self.last_contact_at, created_at) {
            return Freshness::Stale;
        }
        self.last_contact_at = Some(created_at);
        Freshness::Applied
    }

    /// Users without a picture still need their metadata fetched.
    pub fn needs_metadata(&self) -> bool {
        self.picture.is_none()
    }

    /// Name if known, otherwise a short pubkey prefix.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.id.to_hex()[..12].to_string(),
        }
    }
}

fn is_fresh(last: Option<u64>, created_at: u64) -> bool {
    last.map_or(true, |last| created_at >= last)
}

/// Edge changes implied by an accepted contact list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactListChanges {
    /// Every pubkey the list references; each needs a User row.
    pub referenced: Vec<PublicKey>,
    /// When the author is me: the full new contact set.
    pub contacts: Option<BTreeSet<PublicKey>>,
    /// When the author is me: previous contacts the new list dropped.
    pub removed_contacts: Vec<PublicKey>,
    /// When I am known: whether the author now follows me.
    pub author_follows_me: Option<bool>,
}

/// Work out which flags an accepted contact list changes.
///
/// `current_contacts` is my contact set before this list. Lists I author
/// define my contacts; any list defines whether its author follows me. A
/// list I author that names me does both.
pub fn plan_contact_list(
    me: Option<&PublicKey>,
    event: &Event,
    current_contacts: &BTreeSet<PublicKey>,
) -> ContactListChanges {
    let mut seen = BTreeSet::new();
    let referenced: Vec<PublicKey> = event
        .referenced_pubkeys()
        .into_iter()
        .filter(|pk| seen.insert(*pk))
        .collect();

    let mut changes = ContactListChanges {
        referenced,
        ..Default::default()
    };

    let Some(me) = me else {
        return changes;
    };

    if event.pubkey == *me {
        let contacts: BTreeSet<PublicKey> = changes.referenced.iter().copied().collect();
        changes.removed_contacts = current_contacts.difference(&contacts).copied().collect();
        changes.contacts = Some(contacts);
    }
    changes.author_follows_me = Some(event.references(me));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sync_types::{EventDraft, Kind, Tag};

    fn pk(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    fn meta(name: &str) -> ProfileMetadata {
        ProfileMetadata {
            name: Some(name.into()),
            picture: Some(format!("https://pics/{}.png", name)),
            ..Default::default()
        }
    }

    fn contact_list(author: u8, refs: &[u8]) -> Event {
        let draft = EventDraft::new(pk(author), Kind::CONTACT_LIST, "")
            .with_created_at(10)
            .with_tags(refs.iter().map(|b| Tag::pubkey(&pk(*b))).collect());
        let id = draft.id();
        draft.into_event(id, String::new())
    }

    // ===========================================
    // Metadata last-write-wins
    // ===========================================

    #[test]
    fn first_metadata_is_applied() {
        let mut user = User::new(pk(1));
        assert_eq!(user.apply_metadata(100, &meta("a")), Freshness::Applied);
        assert_eq!(user.name.as_deref(), Some("a"));
        assert_eq!(user.last_metadata_at, Some(100));
    }

    #[test]
    fn older_metadata_is_stale() {
        let mut user = User::new(pk(1));
        user.apply_metadata(100, &meta("new"));

        assert_eq!(user.apply_metadata(99, &meta("old")), Freshness::Stale);
        assert_eq!(user.name.as_deref(), Some("new"));
    }

    #[test]
    fn equal_timestamp_takes_incoming() {
        let mut user = User::new(pk(1));
        user.apply_metadata(100, &meta("first"));

        assert_eq!(user.apply_metadata(100, &meta("second")), Freshness::Applied);
        assert_eq!(user.name.as_deref(), Some("second"));
    }

    #[test]
    fn reapplying_winner_is_idempotent() {
        let mut user = User::new(pk(1));
        user.apply_metadata(100, &meta("a"));
        let snapshot = user.clone();

        user.apply_metadata(100, &meta("a"));
        assert_eq!(user, snapshot);
    }

    #[test]
    fn delivery_order_does_not_change_result() {
        let events = [(5, meta("five")), (9, meta("nine")), (7, meta("seven"))];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let results: Vec<User> = orders
            .iter()
            .map(|order| {
                let mut user = User::new(pk(1));
                for i in order {
                    let (at, m) = &events[*i];
                    user.apply_metadata(*at, m);
                }
                user
            })
            .collect();

        for r in &results {
            assert_eq!(r, &results[0]);
            assert_eq!(r.name.as_deref(), Some("nine"));
        }
    }

    #[test]
    fn metadata_overwrite_clears_missing_fields() {
        let mut user = User::new(pk(1));
        user.apply_metadata(1, &meta("a"));
        user.apply_metadata(
            2,
            &ProfileMetadata {
                name: Some("b".into()),
                ..Default::default()
            },
        );
        assert_eq!(user.picture, None);
        assert!(user.needs_metadata());
    }

    #[test]
    fn contact_list_timestamp_is_tracked_separately() {
        let mut user = User::new(pk(1));
        user.apply_metadata(500, &meta("a"));

        assert!(user.accept_contact_list(10).is_applied());
        assert_eq!(user.accept_contact_list(9), Freshness::Stale);
        assert!(user.accept_contact_list(10).is_applied());
    }

    // ===========================================
    // Contact list planning
    // ===========================================

    #[test]
    fn my_list_defines_contacts() {
        let me = pk(1);
        let event = contact_list(1, &[2, 3]);
        let current: BTreeSet<PublicKey> = [pk(3), pk(4)].into_iter().collect();

        let changes = plan_contact_list(Some(&me), &event, &current);

        assert_eq!(changes.referenced, vec![pk(2), pk(3)]);
        assert_eq!(changes.contacts, Some([pk(2), pk(3)].into_iter().collect()));
        assert_eq!(changes.removed_contacts, vec![pk(4)]);
        assert_eq!(changes.author_follows_me, Some(false));
    }

    #[test]
    fn others_list_naming_me_makes_follower() {
        let me = pk(1);
        let event = contact_list(5, &[1, 6]);

        let changes = plan_contact_list(Some(&me), &event, &BTreeSet::new());

        assert_eq!(changes.contacts, None);
        assert_eq!(changes.author_follows_me, Some(true));
        assert_eq!(changes.referenced, vec![pk(1), pk(6)]);
    }

    #[test]
    fn others_list_without_me_clears_follower() {
        let changes = plan_contact_list(Some(&pk(1)), &contact_list(5, &[6]), &BTreeSet::new());
        assert_eq!(changes.author_follows_me, Some(false));
    }

    #[test]
    fn self_referencing_list_applies_both_rules() {
        let me = pk(1);
        let changes = plan_contact_list(Some(&me), &contact_list(1, &[1]), &BTreeSet::new());

        assert_eq!(changes.contacts, Some([me].into_iter().collect()));
        assert_eq!(changes.author_follows_me, Some(true));
    }

    #[test]
    fn duplicate_references_collapse() {
        let changes = plan_contact_list(None, &contact_list(5, &[2, 2, 3]), &BTreeSet::new());
        assert_eq!(changes.referenced, vec![pk(2), pk(3)]);
    }

    #[test]
    fn unknown_identity_only_touches_rows() {
        let changes = plan_contact_list(None, &contact_list(5, &[2]), &BTreeSet::new());
        assert_eq!(changes.contacts, None);
        assert_eq!(changes.author_follows_me, None);
        assert_eq!(changes.referenced, vec![pk(2)]);
    }

    #[test]
    fn display_name_falls_back_to_pubkey() {
        let user = User::new(pk(0xab));
        assert_eq!(user.display_name(), "abababababab");
    }
}
