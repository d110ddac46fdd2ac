//! Signed relay events
//!
//! Events follow the NIP-01 layout. The id is the SHA-256 of the canonical
//! serialization `[0, pubkey, created_at, kind, tags, content]` and `sig` is
//! a BIP-340 Schnorr signature over the id bytes.

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Kind of the client authentication event
pub const AUTH_EVENT_KIND: i64 = 22242;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("invalid public key")]
    InvalidPubkey,

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("event id does not match its content")]
    IdMismatch,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signing failed")]
    Signing,
}

/// A signed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization
    pub id: String,
    /// Author public key (x-only, hex)
    pub pubkey: String,
    /// Unix seconds; must be a JSON integer
    pub created_at: i64,
    /// Any signed 64-bit integer, so an unexpected kind is rejected by kind
    /// rather than as a parse failure
    pub kind: i64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    /// Hex Schnorr signature over the id
    pub sig: String,
}

impl Event {
    /// Compute the id this event should carry
    pub fn compute_id(&self) -> String {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Check the id and the signature
    pub fn verify(&self) -> Result<(), EventError> {
        let id = self.compute_id();
        if id != self.id.to_ascii_lowercase() {
            return Err(EventError::IdMismatch);
        }

        let pubkey = decode_fixed::<32>(&self.pubkey).ok_or(EventError::InvalidPubkey)?;
        let key = VerifyingKey::from_bytes(&pubkey).map_err(|_| EventError::InvalidPubkey)?;

        let sig = decode_fixed::<64>(&self.sig).ok_or(EventError::InvalidSignature)?;
        let sig = Signature::try_from(&sig[..]).map_err(|_| EventError::InvalidSignature)?;

        let id_bytes = decode_fixed::<32>(&id).ok_or(EventError::IdMismatch)?;
        key.verify_raw(&id_bytes, &sig)
            .map_err(|_| EventError::InvalidSignature)
    }

    /// Value of the first tag named `name`, if it has one
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

fn compute_id(
    pubkey: &str,
    created_at: i64,
    kind: i64,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Event fields before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub created_at: i64,
    pub kind: i64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(kind: i64, created_at: i64) -> Self {
        Self {
            created_at,
            kind,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    /// Add a `[name, value]` tag
    pub fn tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(vec![name.to_string(), value.to_string()]);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// A kind-22242 event answering `challenge` for `relay_url`
    pub fn auth(relay_url: &str, challenge: &str, created_at: i64) -> Self {
        Self::new(AUTH_EVENT_KIND, created_at)
            .tag("relay", relay_url)
            .tag("challenge", challenge)
    }
}

/// A secp256k1 secret key used to sign events
#[derive(Clone)]
pub struct Keys {
    secret: SigningKey,
}

impl Keys {
    /// Parse a hex-encoded 32-byte secret key
    pub fn parse(secret_hex: &str) -> Result<Self, EventError> {
        let bytes = decode_fixed::<32>(secret_hex.trim()).ok_or(EventError::InvalidSecretKey)?;
        let secret = SigningKey::from_bytes(&bytes).map_err(|_| EventError::InvalidSecretKey)?;
        Ok(Self { secret })
    }

    pub fn generate() -> Self {
        let mut rng = rand::rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes);
            if let Ok(secret) = SigningKey::from_bytes(&bytes) {
                return Self { secret };
            }
        }
    }

    /// Hex x-only public key
    pub fn public_key(&self) -> String {
        hex::encode(self.secret.verifying_key().to_bytes())
    }

    pub fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, EventError> {
        let pubkey = self.public_key();
        let id = compute_id(
            &pubkey,
            unsigned.created_at,
            unsigned.kind,
            &unsigned.tags,
            &unsigned.content,
        );
        let id_bytes = decode_fixed::<32>(&id).ok_or(EventError::Signing)?;

        let mut aux = [0u8; 32];
        rand::rng().fill(&mut aux);
        let sig = self
            .secret
            .sign_raw(&id_bytes, &aux)
            .map_err(|_| EventError::Signing)?;

        Ok(Event {
            id,
            pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.to_bytes()),
        })
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keys({})", self.public_key())
    }
}

/// True if `s` looks like a hex x-only public key
pub fn is_valid_pubkey(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
