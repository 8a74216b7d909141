//! Identity keys, event signing and signature verification.
//!
//! This module provides:
//! - `Keys`: a secp256k1 identity (x-only public key + zeroized secret)
//! - `Signer`: turns an [`EventDraft`] into a signed [`Event`]
//! - `Verifier`: checks that an inbound event's id and signature hold
//!
//! # Security Notes
//!
//! - Signatures are BIP-340 Schnorr over the 32-byte event id
//! - The secret is zeroized on drop and never printed by `Debug`

use nostr_sync_types::{Event, EventDraft, PublicKey};
use secp256k1::{schnorr, Keypair, Message, XOnlyPublicKey, SECP256K1};
use thiserror::Error;
use zeroize::Zeroizing;

/// Secret key size (256 bits = 32 bytes).
pub const SECRET_KEY_SIZE: usize = 32;

/// Key errors.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The secret is not a valid secp256k1 scalar.
    #[error("invalid secret key")]
    InvalidSecret,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Draft authored by a different pubkey than the signer's.
    #[error("draft pubkey {draft} does not match signer {signer}")]
    PubkeyMismatch {
        /// Pubkey on the draft.
        draft: PublicKey,
        /// Signer's pubkey.
        signer: PublicKey,
    },

    /// The OS random source failed.
    #[error("random generation failed: {0}")]
    Random(String),
}

/// Something that can sign events for one identity.
pub trait Signer: Send + Sync + 'static {
    /// The identity events are signed as.
    fn public_key(&self) -> PublicKey;

    /// Compute the id of `draft` and sign it.
    fn sign(&self, draft: EventDraft) -> Result<Event, KeyError>;
}

/// Something that can check inbound events.
pub trait Verifier: Send + Sync + 'static {
    /// Whether the event's id matches its content and its signature is
    /// valid for its pubkey.
    fn verify(&self, event: &Event) -> bool;
}

/// A secp256k1 identity.
#[derive(Clone)]
pub struct Keys {
    secret: Zeroizing<[u8; SECRET_KEY_SIZE]>,
    public: PublicKey,
}

impl Keys {
    /// Generate a fresh identity from the OS random source.
    pub fn generate() -> Result<Self, KeyError> {
        loop {
            let mut bytes = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
            getrandom::getrandom(&mut bytes[..]).map_err(|e| KeyError::Random(e.to_string()))?;
            // Out-of-range scalars are astronomically rare; just draw again
            if let Ok(keys) = Self::from_secret_bytes(&bytes[..]) {
                return Ok(keys);
            }
        }
    }

    /// Load an identity from raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(KeyError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let keypair =
            Keypair::from_seckey_slice(SECP256K1, bytes).map_err(|_| KeyError::InvalidSecret)?;
        let (xonly, _parity) = keypair.x_only_public_key();

        let mut secret = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        secret.copy_from_slice(bytes);
        Ok(Self {
            secret,
            public: PublicKey::from_bytes(xonly.serialize()),
        })
    }

    /// Load an identity from a 64-character hex secret.
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_secret.trim()).map_err(|e| KeyError::InvalidHex(e.to_string()))?,
        );
        Self::from_secret_bytes(&bytes)
    }

    /// The secret as hex, for persisting the identity.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret[..]))
    }

    /// The public key.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    fn keypair(&self) -> Result<Keypair, KeyError> {
        Keypair::from_seckey_slice(SECP256K1, &self.secret[..]).map_err(|_| KeyError::InvalidSecret)
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Signer for Keys {
    fn public_key(&self) -> PublicKey {
        self.public
    }

    fn sign(&self, draft: EventDraft) -> Result<Event, KeyError> {
        if draft.pubkey != self.public {
            return Err(KeyError::PubkeyMismatch {
                draft: draft.pubkey,
                signer: self.public,
            });
        }
        let id = draft.id();
        let message = Message::from_digest(*id.as_bytes());
        let signature = SECP256K1.sign_schnorr_no_aux_rand(&message, &self.keypair()?);
        Ok(draft.into_event(id, hex::encode(signature.serialize())))
    }
}

/// BIP-340 verifier for inbound events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchnorrVerifier;

impl Verifier for SchnorrVerifier {
    fn verify(&self, event: &Event) -> bool {
        if !event.has_valid_id() {
            return false;
        }
        let Ok(sig_bytes) = hex::decode(&event.sig) else {
            return false;
        };
        let Ok(signature) = schnorr::Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let Ok(pubkey) = XOnlyPublicKey::from_slice(event.pubkey.as_bytes()) else {
            return false;
        };
        let message = Message::from_digest(*event.id.as_bytes());
        SECP256K1.verify_schnorr(&signature, &message, &pubkey).is_ok()
    }
}
