//! Storage Trait Definitions
//!
//! The coordinator only talks to these traits. Every state change is a
//! compare-and-set so concurrent handlers over the same store never move a
//! session twice.

use async_trait::async_trait;
use thiserror::Error;

use crate::approval::ApprovalVote;
use crate::audit::AuditEntry;
use crate::mfa::MfaVerificationRecord;
use crate::session::{
    FailureReason, NonceCommitment, PartialSignature, SessionStatus, SigningSession,
};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The commitment value already exists somewhere in the ledger
    #[error("Commitment already recorded")]
    CommitmentReused,

    /// The nonce round of the session already holds `t` commitments
    #[error("Round closed for session {0}")]
    RoundClosed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &SigningSession) -> StorageResult<()>;

    async fn get_session(&self, id: &str) -> StorageResult<Option<SigningSession>>;

    /// Move `from → to`; false when the session was not in `from`
    async fn compare_and_set_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: u64,
    ) -> StorageResult<bool>;

    /// `aggregating → completed` with the aggregated signature
    async fn complete_session(&self, id: &str, signature: &str, now: u64) -> StorageResult<bool>;

    /// Any non-terminal state → `failed`
    async fn fail_session(
        &self,
        id: &str,
        reason: FailureReason,
        detail: Option<&str>,
        now: u64,
    ) -> StorageResult<bool>;

    /// Any non-terminal state → `expired`, only once the deadline has passed
    async fn expire_session(&self, id: &str, now: u64) -> StorageResult<bool>;

    /// Record the published artifact id; false if one is already stored
    async fn set_artifact_id(&self, id: &str, artifact_id: &str, now: u64) -> StorageResult<bool>;

    /// Non-terminal sessions whose deadline is at or before `now`
    async fn list_past_deadline(&self, now: u64) -> StorageResult<Vec<SigningSession>>;
}

/// Nonce commitments and signature shares
#[async_trait]
pub trait ContributionLedger: Send + Sync {
    /// Record a commitment atomically against both uniqueness rules and the
    /// round size; returns the number of commitments now in the session
    async fn record_nonce(
        &self,
        commitment: &NonceCommitment,
        threshold: u16,
    ) -> StorageResult<u16>;

    /// Commitments in submission order
    async fn nonces_for_session(&self, session_id: &str) -> StorageResult<Vec<NonceCommitment>>;

    /// Record a share; requires a commitment from the same participant.
    /// Returns the number of shares now in the session.
    async fn record_partial_signature(&self, share: &PartialSignature) -> StorageResult<u16>;

    async fn partials_for_session(&self, session_id: &str)
        -> StorageResult<Vec<PartialSignature>>;
}

/// Approval votes and MFA claims
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn record_vote(&self, vote: &ApprovalVote) -> StorageResult<()>;

    async fn votes_for_session(&self, session_id: &str) -> StorageResult<Vec<ApprovalVote>>;

    /// Claim an (operation hash, device) pair; `Duplicate` when already claimed
    async fn record_mfa_verification(&self, record: &MfaVerificationRecord) -> StorageResult<()>;

    async fn get_mfa_verification(
        &self,
        operation_hash: &str,
        device_id: &str,
    ) -> StorageResult<Option<MfaVerificationRecord>>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<i64>;

    async fn audit_for_session(&self, session_id: &str) -> StorageResult<Vec<AuditEntry>>;
}

/// Everything the coordinator needs from one backing store
pub trait SigningStore: SessionStore + ContributionLedger + ApprovalStore + AuditLog {}

impl<T> SigningStore for T where T: SessionStore + ContributionLedger + ApprovalStore + AuditLog {}
