//! Append-only audit trail
//!
//! Entries record transitions, rejections and MFA attempts. Cryptographic
//! material only ever appears as a truncated SHA-256 fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Audit severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Audited event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SessionCreated,
    StateTransition,
    NonceAccepted,
    SignatureShareAccepted,
    ContributionRejected,
    VoteRecorded,
    VoteRejected,
    MfaVerification,
    ArtifactPublished,
    PublishFailed,
    NotificationFailed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::StateTransition => "state_transition",
            Self::NonceAccepted => "nonce_accepted",
            Self::SignatureShareAccepted => "signature_share_accepted",
            Self::ContributionRejected => "contribution_rejected",
            Self::VoteRecorded => "vote_recorded",
            Self::VoteRejected => "vote_rejected",
            Self::MfaVerification => "mfa_verification",
            Self::ArtifactPublished => "artifact_published",
            Self::PublishFailed => "publish_failed",
            Self::NotificationFailed => "notification_failed",
        }
    }
}

impl std::str::FromStr for AuditEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_created" => Ok(Self::SessionCreated),
            "state_transition" => Ok(Self::StateTransition),
            "nonce_accepted" => Ok(Self::NonceAccepted),
            "signature_share_accepted" => Ok(Self::SignatureShareAccepted),
            "contribution_rejected" => Ok(Self::ContributionRejected),
            "vote_recorded" => Ok(Self::VoteRecorded),
            "vote_rejected" => Ok(Self::VoteRejected),
            "mfa_verification" => Ok(Self::MfaVerification),
            "artifact_published" => Ok(Self::ArtifactPublished),
            "publish_failed" => Ok(Self::PublishFailed),
            "notification_failed" => Ok(Self::NotificationFailed),
            _ => Err(format!("unknown audit event: {}", s)),
        }
    }
}

/// One audit log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned by the store
    pub id: Option<i64>,
    pub session_id: String,
    pub event: AuditEvent,
    pub severity: Severity,
    /// Error code or transition label
    pub reason_code: String,
    /// Role of the acting participant, never their identifier
    pub actor_role: Option<String>,
    pub detail: serde_json::Value,
    pub recorded_at: u64,
}

impl AuditEntry {
    pub fn new(
        session_id: impl Into<String>,
        event: AuditEvent,
        severity: Severity,
        reason_code: impl Into<String>,
        recorded_at: u64,
    ) -> Self {
        Self {
            id: None,
            session_id: session_id.into(),
            event,
            severity,
            reason_code: reason_code.into(),
            actor_role: None,
            detail: serde_json::Value::Null,
            recorded_at,
        }
    }

    pub fn with_role(mut self, role: impl ToString) -> Self {
        self.actor_role = Some(role.to_string());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Non-reversible fragment for forensic correlation
///
/// First 8 bytes of SHA-256 over the value, hex encoded.
pub fn fingerprint(value: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(value.as_ref());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_truncated_and_stable() {
        let fp = fingerprint("02abcdef");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, fingerprint("02abcdef"));
        assert_ne!(fp, fingerprint("02abcdee"));
        assert!(!fp.contains("abcdef"));
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in [
            AuditEvent::SessionCreated,
            AuditEvent::ContributionRejected,
            AuditEvent::MfaVerification,
            AuditEvent::NotificationFailed,
        ] {
            assert_eq!(event.as_str().parse::<AuditEvent>().unwrap(), event);
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
