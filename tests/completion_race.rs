//! The session leaving `aggregating` between the claim and the final write

mod common;

use async_trait::async_trait;
use common::{dealer_federation, note, START};
use federation_frost::approval::ApprovalVote;
use federation_frost::audit::{AuditEntry, AuditEvent};
use federation_frost::clock::ManualClock;
use federation_frost::coordinator::{CoordinatorSettings, SigningCoordinator};
use federation_frost::error::EngineError;
use federation_frost::federation::StaticDirectory;
use federation_frost::mfa::MfaVerificationRecord;
use federation_frost::participant::GuardianSigner;
use federation_frost::policy::FederationPolicy;
use federation_frost::publisher::{RecordingNotifier, RecordingPublisher};
use federation_frost::session::{
    FailureReason, NonceCommitment, PartialSignature, SessionStatus, SigningSession,
};
use federation_frost::storage::{
    ApprovalStore, AuditLog, ContributionLedger, SessionStore, SqliteStore, StorageError,
    StorageResult,
};
use federation_frost::types::CreateSessionRequest;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Interference {
    /// The expiry sweep retires the session just before completion
    ExpireFirst,
    /// The completion write itself fails
    WriteFails,
}

/// SQLite store that interferes with `complete_session`
struct InterferingStore {
    inner: SqliteStore,
    mode: Interference,
}

#[async_trait]
impl SessionStore for InterferingStore {
    async fn insert_session(&self, session: &SigningSession) -> StorageResult<()> {
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<SigningSession>> {
        self.inner.get_session(id).await
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: u64,
    ) -> StorageResult<bool> {
        self.inner.compare_and_set_status(id, from, to, now).await
    }

    async fn complete_session(&self, id: &str, signature: &str, now: u64) -> StorageResult<bool> {
        match self.mode {
            Interference::ExpireFirst => {
                assert!(self.inner.expire_session(id, i64::MAX as u64).await?);
                self.inner.complete_session(id, signature, now).await
            }
            Interference::WriteFails => Err(StorageError::Database("disk I/O error".into())),
        }
    }

    async fn fail_session(
        &self,
        id: &str,
        reason: FailureReason,
        detail: Option<&str>,
        now: u64,
    ) -> StorageResult<bool> {
        self.inner.fail_session(id, reason, detail, now).await
    }

    async fn expire_session(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.inner.expire_session(id, now).await
    }

    async fn set_artifact_id(&self, id: &str, artifact_id: &str, now: u64) -> StorageResult<bool> {
        self.inner.set_artifact_id(id, artifact_id, now).await
    }

    async fn list_past_deadline(&self, now: u64) -> StorageResult<Vec<SigningSession>> {
        self.inner.list_past_deadline(now).await
    }
}

#[async_trait]
impl ContributionLedger for InterferingStore {
    async fn record_nonce(&self, commitment: &NonceCommitment, threshold: u16) -> StorageResult<u16> {
        self.inner.record_nonce(commitment, threshold).await
    }

    async fn nonces_for_session(&self, session_id: &str) -> StorageResult<Vec<NonceCommitment>> {
        self.inner.nonces_for_session(session_id).await
    }

    async fn record_partial_signature(&self, share: &PartialSignature) -> StorageResult<u16> {
        self.inner.record_partial_signature(share).await
    }

    async fn partials_for_session(&self, session_id: &str) -> StorageResult<Vec<PartialSignature>> {
        self.inner.partials_for_session(session_id).await
    }
}

#[async_trait]
impl ApprovalStore for InterferingStore {
    async fn record_vote(&self, vote: &ApprovalVote) -> StorageResult<()> {
        self.inner.record_vote(vote).await
    }

    async fn votes_for_session(&self, session_id: &str) -> StorageResult<Vec<ApprovalVote>> {
        self.inner.votes_for_session(session_id).await
    }

    async fn record_mfa_verification(&self, record: &MfaVerificationRecord) -> StorageResult<()> {
        self.inner.record_mfa_verification(record).await
    }

    async fn get_mfa_verification(
        &self,
        operation_hash: &str,
        device_id: &str,
    ) -> StorageResult<Option<MfaVerificationRecord>> {
        self.inner.get_mfa_verification(operation_hash, device_id).await
    }
}

#[async_trait]
impl AuditLog for InterferingStore {
    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<i64> {
        self.inner.append_audit(entry).await
    }

    async fn audit_for_session(&self, session_id: &str) -> StorageResult<Vec<AuditEntry>> {
        self.inner.audit_for_session(session_id).await
    }
}

struct Setup {
    coordinator: SigningCoordinator,
    store: Arc<InterferingStore>,
    guardians: BTreeMap<String, GuardianSigner>,
}

fn setup(mode: Interference) -> Setup {
    let (record, guardians) = dealer_federation(
        "fam",
        &["alice", "bob", "carol"],
        2,
        FederationPolicy::default(),
        &BTreeMap::new(),
    );
    let store = Arc::new(InterferingStore {
        inner: SqliteStore::in_memory().unwrap(),
        mode,
    });
    let coordinator = SigningCoordinator::new(
        store.clone(),
        Arc::new(StaticDirectory::from_records([record]).unwrap()),
        Arc::new(RecordingPublisher::new()),
        Arc::new(RecordingNotifier::new()),
        Arc::new(ManualClock::new(START)),
        CoordinatorSettings::default(),
    );
    Setup {
        coordinator,
        store,
        guardians,
    }
}

/// Runs both rounds; the last share triggers aggregation
async fn sign_to_threshold(s: &Setup) -> (String, Result<(), EngineError>) {
    let session = s
        .coordinator
        .create_session(CreateSessionRequest {
            federation_id: "fam".into(),
            requester_id: "alice".into(),
            payload: note("racing the sweep"),
            threshold: None,
        })
        .await
        .unwrap();

    for name in ["alice", "bob"] {
        let submission = s.guardians[name].commit(&session.id).unwrap();
        s.coordinator
            .submit_nonce_commitment(&session.id, name, &submission.commitment)
            .await
            .unwrap();
    }
    let package = s.coordinator.signing_package(&session.id).await.unwrap();

    let alice = s.guardians["alice"].sign(&package).unwrap();
    s.coordinator
        .submit_partial_signature(&session.id, "alice", &alice.share)
        .await
        .unwrap();

    let bob = s.guardians["bob"].sign(&package).unwrap();
    let last = s
        .coordinator
        .submit_partial_signature(&session.id, "bob", &bob.share)
        .await
        .map(|_| ());
    (session.id, last)
}

fn transitions(trail: &[AuditEntry]) -> Vec<&str> {
    trail
        .iter()
        .filter(|e| e.event == AuditEvent::StateTransition)
        .map(|e| e.reason_code.as_str())
        .collect()
}

#[tokio::test]
async fn test_expired_during_aggregation_is_not_reported_completed() {
    let s = setup(Interference::ExpireFirst);
    let (session_id, last) = sign_to_threshold(&s).await;
    assert!(matches!(last, Err(EngineError::SessionExpired(_))));

    let stored = s.store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Expired);
    assert!(stored.signature.is_none());

    let trail = s.coordinator.audit_trail(&session_id).await.unwrap();
    assert!(!transitions(&trail).contains(&"completed"));
}

#[tokio::test]
async fn test_failed_completion_write_fails_session() {
    let s = setup(Interference::WriteFails);
    let (session_id, last) = sign_to_threshold(&s).await;
    assert!(matches!(last, Err(EngineError::Storage(_))));

    let stored = s.store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert_eq!(stored.failure_reason, Some(FailureReason::AggregationFailed));

    let trail = s.coordinator.audit_trail(&session_id).await.unwrap();
    let codes = transitions(&trail);
    assert!(codes.contains(&"aggregation_failed"));
    assert!(!codes.contains(&"completed"));
}
