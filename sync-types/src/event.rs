//! The signed event: the only unit of data relays store and forward.
//!
//! An event's id is the sha256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`. Anything that disagrees
//! with that hash, or whose signature does not verify against `pubkey`, must
//! be discarded on ingest.

use crate::error::ProtocolError;
use crate::ids::{EventId, PublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Event kind discriminator.
///
/// Unknown kinds are legal and simply carry no projection semantics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u16);

impl Kind {
    /// Profile metadata (name, about, picture, lud06).
    pub const METADATA: Kind = Kind(0);
    /// Short text note.
    pub const TEXT_NOTE: Kind = Kind(1);
    /// Contact list: one `p` tag per followed pubkey.
    pub const CONTACT_LIST: Kind = Kind(3);

    /// The numeric value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Kind::METADATA => write!(f, "Kind(metadata)"),
            Kind::TEXT_NOTE => write!(f, "Kind(text_note)"),
            Kind::CONTACT_LIST => write!(f, "Kind(contact_list)"),
            Kind(other) => write!(f, "Kind({})", other),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        Kind(value)
    }
}

/// A single tag: an ordered list of strings, first element is the tag name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    /// Build a tag from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// A `["p", <pubkey>]` reference tag.
    pub fn pubkey(pubkey: &PublicKey) -> Self {
        Self(vec!["p".to_string(), pubkey.to_hex()])
    }

    /// Tag name (first element).
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (second element).
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// All parts of the tag.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The referenced pubkey if this is a well-formed `p` tag.
    pub fn referenced_pubkey(&self) -> Option<PublicKey> {
        if self.name() != Some("p") {
            return None;
        }
        self.value().and_then(|v| PublicKey::from_hex(v).ok())
    }
}

/// An event before it is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Author.
    pub pubkey: PublicKey,
    /// Unix seconds.
    pub created_at: u64,
    /// Kind discriminator.
    pub kind: Kind,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Content, interpreted per kind.
    pub content: String,
}

impl EventDraft {
    /// New draft stamped with the current time and no tags.
    pub fn new(pubkey: PublicKey, kind: Kind, content: impl Into<String>) -> Self {
        Self {
            pubkey,
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Replace the tags.
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Override the timestamp.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// The id this draft will have once signed.
    pub fn id(&self) -> EventId {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Attach an id and signature.
    pub fn into_event(self, id: EventId, sig: String) -> Event {
        Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

/// A signed event as exchanged with relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// sha256 of the canonical serialization.
    pub id: EventId,
    /// Author.
    pub pubkey: PublicKey,
    /// Unix seconds, author-asserted.
    pub created_at: u64,
    /// Kind discriminator.
    pub kind: Kind,
    /// Ordered tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Content, interpreted per kind.
    #[serde(default)]
    pub content: String,
    /// Hex Schnorr signature over `id`.
    pub sig: String,
}

impl Event {
    /// Recompute the id from the other fields and compare.
    pub fn has_valid_id(&self) -> bool {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ) == self.id
    }

    /// Every well-formed `p` tag value, in tag order.
    pub fn referenced_pubkeys(&self) -> Vec<PublicKey> {
        self.tags
            .iter()
            .filter_map(Tag::referenced_pubkey)
            .collect()
    }

    /// Whether a `p` tag names `pubkey`.
    pub fn references(&self, pubkey: &PublicKey) -> bool {
        self.tags
            .iter()
            .any(|t| t.referenced_pubkey().as_ref() == Some(pubkey))
    }

    /// Parse a standalone event object.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to a compact JSON object.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// sha256 over `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> EventId {
    // Serializing a tuple of plain values into a Vec cannot fail.
    let canonical =
        serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content)).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    EventId::from_bytes(bytes)
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
