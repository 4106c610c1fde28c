//! Engine error taxonomy
//!
//! Every rejection the coordinator can return. Security-critical variants are
//! always written to the audit log at `critical` severity before they reach
//! the caller.

use crate::session::SessionStatus;
use crate::storage::StorageError;
use thiserror::Error;

/// Root error type for the signing engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid threshold: need 2 <= t ({threshold}) <= n ({participants}) <= 7")]
    InvalidThreshold { threshold: u16, participants: u16 },

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("duplicate contribution from {participant} in session {session_id}")]
    DuplicateContribution {
        session_id: String,
        participant: String,
    },

    #[error("participant {participant} has no nonce commitment in session {session_id}")]
    MissingNonce {
        session_id: String,
        participant: String,
    },

    #[error("nonce commitment has already been used")]
    NonceReuse,

    #[error("nonce round closed: session {0} already has its signing set")]
    RoundClosed(String),

    #[error("signature aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("approval quorum not met: {0}")]
    QuorumNotMet(String),

    #[error("physical MFA verification failed: {0}")]
    MfaVerificationFailed(String),

    #[error("publishing failed: {0}")]
    PublishFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("federation not found: {0}")]
    FederationNotFound(String),

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("session is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: SessionStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed stored record: {0}")]
    MalformedRecord(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    /// Errors that must be audited at elevated severity
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            EngineError::NonceReuse | EngineError::MfaVerificationFailed(_)
        )
    }

    /// Stable code for API responses and audit reason codes
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::InvalidThreshold { .. } => "INVALID_THRESHOLD",
            EngineError::SessionExpired(_) => "SESSION_EXPIRED",
            EngineError::DuplicateContribution { .. } => "DUPLICATE_CONTRIBUTION",
            EngineError::MissingNonce { .. } => "MISSING_NONCE",
            EngineError::NonceReuse => "NONCE_REUSE",
            EngineError::RoundClosed(_) => "ROUND_CLOSED",
            EngineError::AggregationFailed(_) => "AGGREGATION_FAILED",
            EngineError::QuorumNotMet(_) => "QUORUM_NOT_MET",
            EngineError::MfaVerificationFailed(_) => "MFA_VERIFICATION_FAILED",
            EngineError::PublishFailed(_) => "PUBLISH_FAILED",
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::FederationNotFound(_) => "FEDERATION_NOT_FOUND",
            EngineError::UnknownParticipant(_) => "UNKNOWN_PARTICIPANT",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::MalformedRecord(_) => "MALFORMED_RECORD",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Message safe to return to non-privileged callers
    ///
    /// Strips participant identifiers and storage internals.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::DuplicateContribution { .. } => {
                "contribution already recorded for this participant".to_string()
            }
            EngineError::MissingNonce { .. } => {
                "no nonce commitment recorded for this participant".to_string()
            }
            EngineError::UnknownParticipant(_) => "participant is not on the roster".to_string(),
            EngineError::Storage(_) | EngineError::MalformedRecord(_) => {
                "internal storage failure".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_critical_classification() {
        assert!(EngineError::NonceReuse.is_security_critical());
        assert!(EngineError::MfaVerificationFailed("stale".into()).is_security_critical());
        assert!(!EngineError::SessionExpired("s".into()).is_security_critical());
        assert!(!EngineError::PublishFailed("relay down".into()).is_security_critical());
    }

    #[test]
    fn test_public_message_hides_participants() {
        let err = EngineError::DuplicateContribution {
            session_id: "s1".into(),
            participant: "alice".into(),
        };
        assert_eq!(err.error_code(), "DUPLICATE_CONTRIBUTION");
        assert!(!err.public_message().contains("alice"));
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = EngineError::InvalidState {
            expected: "collecting_nonces",
            actual: SessionStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
        assert_eq!(err.error_code(), "INVALID_STATE");
    }
}
