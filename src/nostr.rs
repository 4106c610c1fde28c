//! Nostr event hashing (NIP-01)
//!
//! The federation signs the event id, so the id must be computed with the
//! federation's x-only group key as `pubkey` before the signing rounds start.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NostrError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Event fields chosen by the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

/// A signed Nostr event as handed to relays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Serialize for hashing: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(pubkey_hex: &str, template: &EventTemplate) -> Result<String, NostrError> {
    if !is_lower_hex(pubkey_hex, 64) {
        return Err(NostrError::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        pubkey_hex,
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    ))
    .map_err(|e| NostrError::Serialization(e.to_string()))
}

/// Event id: SHA-256 of the serialized event
pub fn event_id(pubkey: &[u8; 32], template: &EventTemplate) -> Result<[u8; 32], NostrError> {
    let serialized = serialize_event(&hex::encode(pubkey), template)?;
    Ok(Sha256::digest(serialized.as_bytes()).into())
}

/// Assemble the signed event from its parts
pub fn signed_event(
    pubkey: &[u8; 32],
    template: &EventTemplate,
    signature: &[u8; 64],
) -> Result<SignedEvent, NostrError> {
    let id = event_id(pubkey, template)?;
    Ok(SignedEvent {
        id: hex::encode(id),
        pubkey: hex::encode(pubkey),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(signature),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> EventTemplate {
        EventTemplate {
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![vec!["t".to_string(), "family".to_string()]],
            content: "hello from the federation".to_string(),
        }
    }

    #[test]
    fn test_serialization_layout() {
        let serialized = serialize_event(&"ab".repeat(32), &template()).unwrap();
        assert!(serialized.starts_with(&format!("[0,\"{}\",1700000000,1,", "ab".repeat(32))));
        assert!(serialized.ends_with(",\"hello from the federation\"]"));
    }

    #[test]
    fn test_uppercase_pubkey_rejected() {
        assert!(serialize_event(&"AB".repeat(32), &template()).is_err());
    }

    #[test]
    fn test_id_depends_on_pubkey() {
        let a = event_id(&[1u8; 32], &template()).unwrap();
        let b = event_id(&[2u8; 32], &template()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, event_id(&[1u8; 32], &template()).unwrap());
    }

    #[test]
    fn test_signed_event_fields() {
        let event = signed_event(&[7u8; 32], &template(), &[9u8; 64]).unwrap();
        assert_eq!(event.pubkey, "07".repeat(32));
        assert_eq!(event.sig.len(), 128);
        assert_eq!(event.id, hex::encode(event_id(&[7u8; 32], &template()).unwrap()));
    }
}
