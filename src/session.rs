//! Signing session records
//!
//! Lifecycle:
//! collecting_nonces → collecting_signatures → aggregating → completed
//! with `expired` and `failed` reachable from every non-terminal state.

use crate::nostr::{self, EventTemplate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Status of a session through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Round 1: waiting for nonce commitments
    CollectingNonces,
    /// Round 2: waiting for signature shares
    CollectingSignatures,
    /// One caller holds the aggregation claim
    Aggregating,
    /// Aggregated signature stored
    Completed,
    /// Unrecoverable error
    Failed,
    /// Deadline passed before completion
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::CollectingNonces => 0,
            Self::CollectingSignatures => 1,
            Self::Aggregating => 2,
            Self::Completed | Self::Failed | Self::Expired => 3,
        }
    }

    /// Whether `self → next` is a legal forward transition
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Expired => true,
            Self::CollectingSignatures | Self::Aggregating | Self::Completed => {
                next.rank() == self.rank() + 1
            }
            Self::CollectingNonces => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectingNonces => "collecting_nonces",
            Self::CollectingSignatures => "collecting_signatures",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting_nonces" => Ok(Self::CollectingNonces),
            "collecting_signatures" => Ok(Self::CollectingSignatures),
            "aggregating" => Ok(Self::Aggregating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// Why a session ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AggregationFailed,
    QuorumNotMet,
    InvalidContribution,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AggregationFailed => "aggregation_failed",
            Self::QuorumNotMet => "quorum_not_met",
            Self::InvalidContribution => "invalid_contribution",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggregation_failed" => Ok(Self::AggregationFailed),
            "quorum_not_met" => Ok(Self::QuorumNotMet),
            "invalid_contribution" => Ok(Self::InvalidContribution),
            _ => Err(format!("unknown failure reason: {}", s)),
        }
    }
}

/// Payment the federation authorizes; settlement happens elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Amount in base units (sats)
    pub amount: u64,
    /// Destination (invoice, address or lightning address)
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// What is being signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SigningPayload {
    NostrEvent(EventTemplate),
    Payment(PaymentIntent),
}

/// Operation kind derived from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    NostrEvent,
    Payment,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NostrEvent => "nostr_event",
            Self::Payment => "payment",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SigningPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            SigningPayload::NostrEvent(_) => OperationKind::NostrEvent,
            SigningPayload::Payment(_) => OperationKind::Payment,
        }
    }

    /// Amount driving the high-value policy; events carry none
    pub fn amount(&self) -> Option<u64> {
        match self {
            SigningPayload::NostrEvent(_) => None,
            SigningPayload::Payment(intent) => Some(intent.amount),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            SigningPayload::NostrEvent(template) => {
                if template.tags.iter().any(|tag| tag.is_empty()) {
                    return Err("event tags must not be empty arrays".to_string());
                }
                Ok(())
            }
            SigningPayload::Payment(intent) => {
                if intent.amount == 0 {
                    return Err("payment amount must be positive".to_string());
                }
                if intent.destination.trim().is_empty() {
                    return Err("payment destination is required".to_string());
                }
                Ok(())
            }
        }
    }

    /// Message hash the federation signs
    ///
    /// Nostr events hash to their NIP-01 id under the group key; payments
    /// hash the canonical JSON of the intent behind a domain tag.
    pub fn message_hash(&self, group_public_key: &[u8; 32]) -> Result<[u8; 32], String> {
        match self {
            SigningPayload::NostrEvent(template) => {
                nostr::event_id(group_public_key, template).map_err(|e| e.to_string())
            }
            SigningPayload::Payment(intent) => {
                let value = serde_json::to_value(intent).map_err(|e| e.to_string())?;
                let mut hasher = Sha256::new();
                hasher.update(b"federation-payment-v1");
                hasher.update(group_public_key);
                hasher.update(canonical_json(&value).as_bytes());
                Ok(hasher.finalize().into())
            }
        }
    }

    /// Canonical JSON (sorted keys, no whitespace)
    pub fn canonical(&self) -> String {
        serde_json::to_value(self)
            .map(|v| canonical_json(&v))
            .unwrap_or_default()
    }
}

/// Deterministic JSON encoding with object keys sorted
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// One threshold-signing attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSession {
    pub id: String,
    pub federation_id: String,
    pub requester_id: String,
    pub status: SessionStatus,
    pub payload: SigningPayload,
    /// Message hash (hex, 32 bytes)
    pub message_hash: String,
    pub operation_amount: Option<u64>,
    pub threshold: u16,
    pub participant_count: u16,
    pub created_at: u64,
    pub expires_at: u64,
    pub updated_at: u64,
    /// Incremented on every transition
    pub version: u64,
    /// Aggregated signature R || s (hex, 64 bytes)
    pub signature: Option<String>,
    pub artifact_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Non-secret detail for failures (e.g. the culprit participant)
    pub failure_detail: Option<String>,
}

impl SigningSession {
    /// Create a session in `collecting_nonces`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        federation_id: String,
        requester_id: String,
        payload: SigningPayload,
        message_hash: [u8; 32],
        threshold: u16,
        participant_count: u16,
        now: u64,
        lifetime_secs: u64,
    ) -> Self {
        let operation_amount = payload.amount();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            federation_id,
            requester_id,
            status: SessionStatus::CollectingNonces,
            payload,
            message_hash: hex::encode(message_hash),
            operation_amount,
            threshold,
            participant_count,
            created_at: now,
            expires_at: now + lifetime_secs,
            updated_at: now,
            version: 0,
            signature: None,
            artifact_id: None,
            failure_reason: None,
            failure_detail: None,
        }
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Deadline reached and not yet terminal
    pub fn is_past_deadline(&self, now: u64) -> bool {
        !self.status.is_terminal() && now >= self.expires_at
    }

    pub fn message_hash_bytes(&self) -> Result<[u8; 32], String> {
        let bytes = hex::decode(&self.message_hash).map_err(|e| e.to_string())?;
        bytes
            .try_into()
            .map_err(|_| "message hash must be 32 bytes".to_string())
    }
}

/// Round-1 contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceCommitment {
    pub session_id: String,
    pub participant_id: String,
    pub signer_index: u16,
    /// Serialized FROST signing commitments (hex)
    pub commitment: String,
    pub submitted_at: u64,
}

/// Round-2 contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub session_id: String,
    pub participant_id: String,
    pub signer_index: u16,
    /// Serialized FROST signature share (hex)
    pub share: String,
    pub submitted_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        use SessionStatus::*;
        assert!(CollectingNonces.can_transition_to(CollectingSignatures));
        assert!(CollectingSignatures.can_transition_to(Aggregating));
        assert!(Aggregating.can_transition_to(Completed));
        assert!(!CollectingNonces.can_transition_to(Aggregating));
        assert!(!CollectingSignatures.can_transition_to(CollectingNonces));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Expired.can_transition_to(CollectingNonces));
        assert!(Aggregating.can_transition_to(Failed));
        assert!(CollectingNonces.can_transition_to(Expired));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            SessionStatus::CollectingNonces,
            SessionStatus::CollectingSignatures,
            SessionStatus::Aggregating,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("pending".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": {"d": [2, {"z": 0, "y": 1}], "c": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"x","d":[2,{"y":1,"z":0}]},"b":1}"#
        );
    }

    #[test]
    fn test_payment_hash_binds_group_key() {
        let payload = SigningPayload::Payment(PaymentIntent {
            amount: 21_000,
            destination: "lnbc1...".to_string(),
            memo: None,
        });
        let a = payload.message_hash(&[1u8; 32]).unwrap();
        let b = payload.message_hash(&[2u8; 32]).unwrap();
        assert_ne!(a, b);
        assert_eq!(payload.amount(), Some(21_000));
        assert_eq!(payload.kind(), OperationKind::Payment);
    }

    #[test]
    fn test_payload_validation() {
        let zero = SigningPayload::Payment(PaymentIntent {
            amount: 0,
            destination: "addr".to_string(),
            memo: None,
        });
        assert!(zero.validate().is_err());

        let event = SigningPayload::NostrEvent(EventTemplate {
            created_at: 1,
            kind: 1,
            tags: vec![vec![]],
            content: String::new(),
        });
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_deadline() {
        let payload = SigningPayload::NostrEvent(EventTemplate {
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hi".to_string(),
        });
        let mut session = SigningSession::new(
            "fam".into(),
            "alice".into(),
            payload,
            [0u8; 32],
            2,
            3,
            1_000,
            600,
        );
        assert!(!session.is_past_deadline(1_599));
        assert!(session.is_past_deadline(1_600));
        session.status = SessionStatus::Completed;
        assert!(!session.is_past_deadline(10_000));
    }
}
