//! Physical-MFA verifier
//!
//! A tap-to-sign card produces a P-256 ECDSA signature over an operation hash
//! that binds the session id, the canonical payload and the tap timestamp.
//! This layer proves physical possession; it takes no part in the threshold
//! math and runs only after aggregation has succeeded.

use crate::audit::{fingerprint, AuditEntry, AuditEvent, Severity};
use crate::federation::{FederationRecord, MfaDevice};
use crate::policy::MfaRequirement;
use crate::session::{SigningPayload, SigningSession};
use crate::storage::{SigningStore, StorageError};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const OPERATION_HASH_DOMAIN: &[u8] = b"federation-mfa-v1";

/// Default tolerance between tap and verification
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Proof of a physical card tap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalMfaSignature {
    /// ECDSA signature, raw r || s (64 bytes) or DER, hex encoded
    pub signature: String,
    /// SEC1 P-256 public key (hex)
    pub public_key: String,
    /// Unix seconds declared by the card holder's client
    pub timestamp: u64,
    pub device_id: String,
}

/// Why a proof was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MfaFailure {
    #[error("no card registered for this participant")]
    NotRegistered,
    #[error("proof device does not match the registered card")]
    DeviceMismatch,
    #[error("proof key does not match the registered card")]
    KeyMismatch,
    #[error("timestamp outside tolerance ({skew}s > {tolerance}s)")]
    StaleTimestamp { skew: u64, tolerance: u64 },
    #[error("signature does not verify")]
    BadSignature,
    #[error("tap already used")]
    Replay,
    #[error("malformed proof: {0}")]
    Malformed(String),
    #[error("proof required but absent")]
    Missing,
}

impl MfaFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "MFA_NOT_REGISTERED",
            Self::DeviceMismatch => "MFA_DEVICE_MISMATCH",
            Self::KeyMismatch => "MFA_KEY_MISMATCH",
            Self::StaleTimestamp { .. } => "MFA_STALE_TIMESTAMP",
            Self::BadSignature => "MFA_BAD_SIGNATURE",
            Self::Replay => "MFA_REPLAY",
            Self::Malformed(_) => "MFA_MALFORMED",
            Self::Missing => "MFA_MISSING",
        }
    }
}

/// Stored record of an accepted tap, keyed by (operation hash, device id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaVerificationRecord {
    pub operation_hash: String,
    pub device_id: String,
    pub session_id: String,
    pub participant_id: String,
    pub verified_at: u64,
}

/// Outcome for one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaCheck {
    pub participant_id: String,
    pub outcome: Result<(), MfaFailure>,
}

/// Outcome of the post-aggregation pass over a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaReport {
    pub requirement: MfaRequirement,
    pub checks: Vec<MfaCheck>,
}

impl MfaReport {
    pub fn verified_count(&self) -> usize {
        self.checks.iter().filter(|c| c.outcome.is_ok()).count()
    }

    /// Reason the operation must be blocked, if any
    pub fn blocking_failure(&self) -> Option<String> {
        match self.requirement {
            MfaRequirement::Skip | MfaRequirement::VerifyIfPresent => None,
            MfaRequirement::Mandatory => {
                if let Some(failed) = self.checks.iter().find(|c| c.outcome.is_err()) {
                    let reason = failed
                        .outcome
                        .as_ref()
                        .err()
                        .map(|e| e.code())
                        .unwrap_or("MFA_FAILED");
                    return Some(reason.to_string());
                }
                if self.verified_count() == 0 {
                    return Some(MfaFailure::Missing.code().to_string());
                }
                None
            }
        }
    }
}

/// Operation hash a card must sign
pub fn operation_hash(session_id: &str, payload: &SigningPayload, timestamp: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(OPERATION_HASH_DOMAIN);
    hasher.update([0u8]);
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.canonical().as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.to_string().as_bytes());
    hasher.finalize().into()
}

fn parse_key(hex_key: &str) -> Result<VerifyingKey, MfaFailure> {
    let bytes = hex::decode(hex_key).map_err(|e| MfaFailure::Malformed(e.to_string()))?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| MfaFailure::Malformed(e.to_string()))
}

fn parse_signature(hex_sig: &str) -> Result<Signature, MfaFailure> {
    let bytes = hex::decode(hex_sig).map_err(|e| MfaFailure::Malformed(e.to_string()))?;
    let parsed = if bytes.len() == 64 {
        Signature::from_slice(&bytes)
    } else {
        Signature::from_der(&bytes)
    };
    parsed.map_err(|e| MfaFailure::Malformed(e.to_string()))
}

/// P-256 tap verifier
#[derive(Debug, Clone)]
pub struct PhysicalMfaVerifier {
    tolerance_secs: u64,
}

impl Default for PhysicalMfaVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_SECS)
    }
}

impl PhysicalMfaVerifier {
    pub fn new(tolerance_secs: u64) -> Self {
        Self { tolerance_secs }
    }

    pub fn tolerance_secs(&self) -> u64 {
        self.tolerance_secs
    }

    /// Stateless checks: registration binding, tolerance window, signature
    ///
    /// Returns the operation hash the proof was verified against.
    pub fn verify_proof(
        &self,
        session_id: &str,
        payload: &SigningPayload,
        proof: &PhysicalMfaSignature,
        registered: Option<&MfaDevice>,
        now: u64,
    ) -> Result<[u8; 32], MfaFailure> {
        let device = registered.ok_or(MfaFailure::NotRegistered)?;
        if device.device_id != proof.device_id {
            return Err(MfaFailure::DeviceMismatch);
        }

        let registered_key = parse_key(&device.public_key)?;
        let proof_key = parse_key(&proof.public_key)?;
        if registered_key != proof_key {
            return Err(MfaFailure::KeyMismatch);
        }

        let skew = now.abs_diff(proof.timestamp);
        if skew > self.tolerance_secs {
            return Err(MfaFailure::StaleTimestamp {
                skew,
                tolerance: self.tolerance_secs,
            });
        }

        let signature = parse_signature(&proof.signature)?;
        let hash = operation_hash(session_id, payload, proof.timestamp);
        registered_key
            .verify(&hash, &signature)
            .map_err(|_| MfaFailure::BadSignature)?;
        Ok(hash)
    }

    /// Verify one proof and claim its (operation hash, device) pair
    ///
    /// A pair already claimed by the same session and participant counts as
    /// verified, so a retried publish does not trip the replay guard.
    pub async fn verify_and_record(
        &self,
        store: &dyn SigningStore,
        session: &SigningSession,
        participant_id: &str,
        proof: &PhysicalMfaSignature,
        registered: Option<&MfaDevice>,
        now: u64,
    ) -> Result<Result<(), MfaFailure>, StorageError> {
        let hash_hex = hex::encode(operation_hash(&session.id, &session.payload, proof.timestamp));
        if let Some(existing) = store.get_mfa_verification(&hash_hex, &proof.device_id).await? {
            if existing.session_id == session.id && existing.participant_id == participant_id {
                return Ok(Ok(()));
            }
            return Ok(Err(MfaFailure::Replay));
        }

        let hash = match self.verify_proof(&session.id, &session.payload, proof, registered, now) {
            Ok(hash) => hash,
            Err(failure) => return Ok(Err(failure)),
        };

        let record = MfaVerificationRecord {
            operation_hash: hex::encode(hash),
            device_id: proof.device_id.clone(),
            session_id: session.id.clone(),
            participant_id: participant_id.to_string(),
            verified_at: now,
        };
        match store.record_mfa_verification(&record).await {
            Ok(()) => Ok(Ok(())),
            Err(StorageError::Duplicate(_)) => Ok(Err(MfaFailure::Replay)),
            Err(e) => Err(e),
        }
    }

    /// Post-aggregation pass over every vote carrying a proof
    pub async fn verify_session(
        &self,
        store: &dyn SigningStore,
        session: &SigningSession,
        federation: &FederationRecord,
        now: u64,
    ) -> Result<MfaReport, StorageError> {
        let requirement = federation.policy.mfa_requirement(session.operation_amount);
        let mut report = MfaReport {
            requirement,
            checks: Vec::new(),
        };

        match requirement {
            MfaRequirement::Skip => return Ok(report),
            MfaRequirement::VerifyIfPresent | MfaRequirement::Mandatory => {}
        }

        let votes = store.votes_for_session(&session.id).await?;
        for vote in votes {
            let member = federation.member(&vote.voter_id);
            let outcome = match &vote.mfa {
                Some(proof) => {
                    let registered = member.and_then(|m| m.mfa_device.as_ref());
                    self.verify_and_record(store, session, &vote.voter_id, proof, registered, now)
                        .await?
                }
                None => match requirement {
                    MfaRequirement::Mandatory => Err(MfaFailure::Missing),
                    MfaRequirement::Skip | MfaRequirement::VerifyIfPresent => continue,
                },
            };

            let severity = match (&outcome, requirement) {
                (Ok(()), _) => Severity::Info,
                (Err(_), MfaRequirement::Mandatory) => Severity::Critical,
                (Err(_), MfaRequirement::Skip | MfaRequirement::VerifyIfPresent) => {
                    Severity::Warning
                }
            };
            let reason = match &outcome {
                Ok(()) => "MFA_VERIFIED",
                Err(failure) => failure.code(),
            };
            let detail = match &vote.mfa {
                Some(proof) => serde_json::json!({
                    "requirement": requirement,
                    "signature_fp": fingerprint(&proof.signature),
                    "public_key_fp": fingerprint(&proof.public_key),
                    "device_fp": fingerprint(&proof.device_id),
                    "timestamp": proof.timestamp,
                }),
                None => serde_json::json!({ "requirement": requirement }),
            };

            let mut entry =
                AuditEntry::new(&session.id, AuditEvent::MfaVerification, severity, reason, now)
                    .with_detail(detail);
            if let Some(member) = member {
                entry = entry.with_role(member.role);
            }
            store.append_audit(&entry).await?;

            if let Err(failure) = &outcome {
                crate::logging::log_security_event(
                    "mfa_verification_failed",
                    false,
                    serde_json::json!({
                        "session_id": session.id,
                        "reason": failure.code(),
                        "requirement": requirement,
                    }),
                    Some(&session.id),
                );
            }

            report.checks.push(MfaCheck {
                participant_id: vote.voter_id.clone(),
                outcome,
            });
        }

        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TestCard;
    use super::*;
    use crate::session::PaymentIntent;
    use crate::storage::{ApprovalStore, SqliteStore};

    const NOW: u64 = 1_700_000_000;

    fn payload(amount: u64) -> SigningPayload {
        SigningPayload::Payment(PaymentIntent {
            amount,
            destination: "bc1qfamily".to_string(),
            memo: Some("school fees".to_string()),
        })
    }

    #[test]
    fn test_valid_tap_verifies() {
        let card = TestCard::new("card-1");
        let proof = card.tap("session-a", &payload(10), NOW - 30);
        let verifier = PhysicalMfaVerifier::default();
        let device = card.device();
        assert!(verifier
            .verify_proof("session-a", &payload(10), &proof, Some(&device), NOW)
            .is_ok());
    }

    #[test]
    fn test_six_minute_old_tap_rejected() {
        let card = TestCard::new("card-1");
        let proof = card.tap("session-a", &payload(10), NOW - 360);
        let verifier = PhysicalMfaVerifier::new(300);
        let result = verifier.verify_proof("session-a", &payload(10), &proof, Some(&card.device()), NOW);
        assert_eq!(
            result,
            Err(MfaFailure::StaleTimestamp {
                skew: 360,
                tolerance: 300
            })
        );
    }

    #[test]
    fn test_future_tap_outside_window_rejected() {
        let card = TestCard::new("card-1");
        let proof = card.tap("session-a", &payload(10), NOW + 301);
        let result = PhysicalMfaVerifier::default().verify_proof(
            "session-a",
            &payload(10),
            &proof,
            Some(&card.device()),
            NOW,
        );
        assert!(matches!(result, Err(MfaFailure::StaleTimestamp { .. })));
    }

    #[test]
    fn test_tap_bound_to_session() {
        let card = TestCard::new("card-1");
        let proof = card.tap("session-a", &payload(10), NOW);
        let result = PhysicalMfaVerifier::default().verify_proof(
            "session-b",
            &payload(10),
            &proof,
            Some(&card.device()),
            NOW,
        );
        assert_eq!(result, Err(MfaFailure::BadSignature));
    }

    #[test]
    fn test_tap_bound_to_payload() {
        let card = TestCard::new("card-1");
        let proof = card.tap("session-a", &payload(10), NOW);
        let result = PhysicalMfaVerifier::default().verify_proof(
            "session-a",
            &payload(11),
            &proof,
            Some(&card.device()),
            NOW,
        );
        assert_eq!(result, Err(MfaFailure::BadSignature));
    }

    #[test]
    fn test_unregistered_key_rejected() {
        let card = TestCard::new("card-1");
        let impostor = TestCard::new("card-1");
        let proof = impostor.tap("session-a", &payload(10), NOW);
        let result = PhysicalMfaVerifier::default().verify_proof(
            "session-a",
            &payload(10),
            &proof,
            Some(&card.device()),
            NOW,
        );
        assert_eq!(result, Err(MfaFailure::KeyMismatch));

        let result =
            PhysicalMfaVerifier::default().verify_proof("session-a", &payload(10), &proof, None, NOW);
        assert_eq!(result, Err(MfaFailure::NotRegistered));
    }

    #[test]
    fn test_blocking_rules() {
        let ok = MfaCheck {
            participant_id: "a".into(),
            outcome: Ok(()),
        };
        let bad = MfaCheck {
            participant_id: "b".into(),
            outcome: Err(MfaFailure::BadSignature),
        };

        let optional = MfaReport {
            requirement: MfaRequirement::VerifyIfPresent,
            checks: vec![bad.clone()],
        };
        assert_eq!(optional.blocking_failure(), None);

        let mandatory = MfaReport {
            requirement: MfaRequirement::Mandatory,
            checks: vec![ok.clone(), bad],
        };
        assert_eq!(mandatory.blocking_failure().as_deref(), Some("MFA_BAD_SIGNATURE"));

        let absent = MfaReport {
            requirement: MfaRequirement::Mandatory,
            checks: vec![],
        };
        assert_eq!(absent.blocking_failure().as_deref(), Some("MFA_MISSING"));

        let passed = MfaReport {
            requirement: MfaRequirement::Mandatory,
            checks: vec![ok],
        };
        assert_eq!(passed.blocking_failure(), None);
    }

    #[tokio::test]
    async fn test_claimed_tap_cannot_be_replayed() {
        let store = SqliteStore::in_memory().unwrap();
        let session = SigningSession::new(
            "fam".to_string(),
            "alice".to_string(),
            payload(250_000),
            [5u8; 32],
            2,
            3,
            NOW,
            600,
        );
        let card = TestCard::new("card-1");
        let device = card.device();
        let proof = card.tap(&session.id, &session.payload, NOW);
        let verifier = PhysicalMfaVerifier::default();

        let first = verifier
            .verify_and_record(&store, &session, "bob", &proof, Some(&device), NOW)
            .await
            .unwrap();
        assert_eq!(first, Ok(()));

        // Same tap presented on behalf of someone else
        let replay = verifier
            .verify_and_record(&store, &session, "carol", &proof, Some(&device), NOW + 5)
            .await
            .unwrap();
        assert_eq!(replay, Err(MfaFailure::Replay));

        // The original holder retrying (e.g. a second finalize) still passes
        let retry = verifier
            .verify_and_record(&store, &session, "bob", &proof, Some(&device), NOW + 10)
            .await
            .unwrap();
        assert_eq!(retry, Ok(()));

        let hash = hex::encode(operation_hash(&session.id, &session.payload, NOW));
        let claim = store
            .get_mfa_verification(&hash, "card-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.participant_id, "bob");
    }
}
