//! Request and response types for the coordinator API

use crate::approval::QuorumTally;
use crate::mfa::PhysicalMfaSignature;
use crate::session::{FailureReason, OperationKind, SessionStatus, SigningPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Start a signing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub federation_id: String,
    /// Roster member asking for the operation
    pub requester_id: String,
    pub payload: SigningPayload,
    /// Signers required; defaults to the federation's key threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u16>,
}

/// Round 1 submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceSubmission {
    pub participant_id: String,
    /// Serialized FROST signing commitments (hex-encoded)
    pub commitment: String,
}

/// Round 2 submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSubmission {
    pub participant_id: String,
    /// Serialized FROST signature share (hex-encoded)
    pub share: String,
}

/// Approval vote submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub voter_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa: Option<PhysicalMfaSignature>,
}

/// Result of an aggregation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AggregateOutcome {
    /// This call produced the signature
    Completed { signature: String },
    /// Another caller already produced it
    AlreadyCompleted { signature: String },
    /// Another caller holds the aggregation claim
    InProgress,
    AwaitingShares { collected: u16, threshold: u16 },
}

/// Acknowledgement of an accepted contribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionReceipt {
    pub session_id: String,
    pub status: SessionStatus,
    pub collected: u16,
    pub threshold: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateOutcome>,
}

/// Session view safe for any roster member
///
/// Carries no commitments, shares or signatures, and names contributors
/// only by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub federation_id: String,
    pub status: SessionStatus,
    pub operation_kind: OperationKind,
    pub threshold: u16,
    pub participant_count: u16,
    pub nonces_collected: u16,
    pub shares_collected: u16,
    pub contributor_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quorum: Option<QuorumTally>,
    pub created_at: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

/// What a guardian needs to compute its round-2 share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPackageResponse {
    pub session_id: String,
    /// Message hash to sign (hex-encoded 32 bytes)
    pub message_hash: String,
    /// Signer index -> hex-encoded commitments of the signing set
    pub commitments: BTreeMap<u16, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub session_id: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub session_id: String,
    pub artifact_id: String,
    /// True when an earlier call had already published
    pub already_published: bool,
}

/// Sweep summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub failed: usize,
}

/// Generic error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
