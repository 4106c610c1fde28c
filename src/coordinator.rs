//! Session state machine
//!
//! The coordinator holds no session state of its own. Every handler loads the
//! session from the store, checks it, and moves it forward with a
//! compare-and-set, so any number of coordinator instances can share one
//! database.

use crate::aggregation::{self, AggregationError};
use crate::approval::{self, ApprovalVote, QuorumState, QuorumTally};
use crate::audit::{fingerprint, AuditEntry, AuditEvent, Severity};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::federation::{FederationDirectory, FederationRecord, RosterMember};
use crate::logging;
use crate::mfa::PhysicalMfaVerifier;
use crate::nostr;
use crate::policy::{ApprovalTiming, MfaRequirement};
use crate::publisher::{
    ArtifactPublisher, Notification, NotificationOutcome, NotificationTransport,
    PaymentAuthorization, SignedArtifact,
};
use crate::session::{
    FailureReason, NonceCommitment, PartialSignature, SessionStatus, SigningPayload,
    SigningSession,
};
use crate::storage::{SigningStore, StorageError};
use crate::types::{
    AggregateOutcome, ContributionReceipt, CreateSessionRequest, FinalizeResponse, SessionView,
    SigningPackageResponse, SweepReport, VoteRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const MIN_PARTICIPANTS: u16 = 2;
const MAX_PARTICIPANTS: u16 = 7;

/// Tunables taken from the engine configuration
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub session_lifetime_secs: u64,
    pub mfa_tolerance_secs: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            session_lifetime_secs: crate::config::DEFAULT_SESSION_LIFETIME_SECS,
            mfa_tolerance_secs: crate::config::DEFAULT_MFA_TOLERANCE_SECS,
        }
    }
}

impl From<&EngineConfig> for CoordinatorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            session_lifetime_secs: config.session_lifetime_secs,
            mfa_tolerance_secs: config.mfa_tolerance_secs,
        }
    }
}

/// Drives signing sessions from request to published artifact
pub struct SigningCoordinator {
    store: Arc<dyn SigningStore>,
    directory: Arc<dyn FederationDirectory>,
    publisher: Arc<dyn ArtifactPublisher>,
    notifier: Arc<dyn NotificationTransport>,
    clock: Arc<dyn Clock>,
    mfa: PhysicalMfaVerifier,
    settings: CoordinatorSettings,
}

impl SigningCoordinator {
    pub fn new(
        store: Arc<dyn SigningStore>,
        directory: Arc<dyn FederationDirectory>,
        publisher: Arc<dyn ArtifactPublisher>,
        notifier: Arc<dyn NotificationTransport>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            directory,
            publisher,
            notifier,
            clock,
            mfa: PhysicalMfaVerifier::new(settings.mfa_tolerance_secs),
            settings,
        }
    }

    // ------------------------------------------------------------------
    // Session creation
    // ------------------------------------------------------------------

    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SigningSession> {
        let federation = self.federation(&request.federation_id).await?;
        if federation.member(&request.requester_id).is_none() {
            return Err(EngineError::UnknownParticipant(request.requester_id));
        }

        let participants = federation.signer_count();
        let threshold = request.threshold.unwrap_or(federation.key_threshold);
        if threshold < MIN_PARTICIPANTS
            || threshold > participants
            || participants > MAX_PARTICIPANTS
            || threshold < federation.key_threshold
        {
            return Err(EngineError::InvalidThreshold {
                threshold,
                participants,
            });
        }

        request
            .payload
            .validate()
            .map_err(EngineError::InvalidInput)?;
        let group_key = federation
            .group_public_key()
            .map_err(|e| EngineError::malformed(e.to_string()))?;
        let message_hash = request
            .payload
            .message_hash(&group_key)
            .map_err(EngineError::InvalidInput)?;

        let now = self.clock.now();
        let session = SigningSession::new(
            federation.federation_id.clone(),
            request.requester_id.clone(),
            request.payload,
            message_hash,
            threshold,
            participants,
            now,
            self.settings.session_lifetime_secs,
        );
        self.store.insert_session(&session).await?;

        let mut entry = AuditEntry::new(
            &session.id,
            AuditEvent::SessionCreated,
            Severity::Info,
            "SESSION_CREATED",
            now,
        )
        .with_detail(serde_json::json!({
            "operation_kind": session.operation_kind(),
            "threshold": threshold,
            "participants": participants,
            "message_hash_fp": fingerprint(&session.message_hash),
        }));
        if let Some(member) = federation.member(&request.requester_id) {
            entry = entry.with_role(member.role);
        }
        self.audit(entry).await;

        logging::log_session_event(
            "session_created",
            &session.id,
            serde_json::json!({
                "federation_id": session.federation_id,
                "operation_kind": session.operation_kind(),
                "threshold": threshold,
                "participants": participants,
                "expires_at": session.expires_at,
            }),
        );
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Round 1
    // ------------------------------------------------------------------

    pub async fn submit_nonce_commitment(
        &self,
        session_id: &str,
        participant_id: &str,
        commitment: &str,
    ) -> Result<ContributionReceipt> {
        let session = self.load_live(session_id).await?;
        let federation = self.federation(&session.federation_id).await?;
        let (member, signer_index) = match signer(&federation, participant_id) {
            Ok(found) => found,
            Err(e) => return Err(self.reject(&session, None, e).await),
        };

        if session.status != SessionStatus::CollectingNonces {
            let err = EngineError::InvalidState {
                expected: SessionStatus::CollectingNonces.as_str(),
                actual: session.status,
            };
            return Err(self.reject(&session, Some(member), err).await);
        }

        let commitment = match aggregation::canonical_commitment(commitment) {
            Ok(canonical) => canonical,
            Err(e) => {
                let err = EngineError::invalid_input(format!("commitment: {}", e));
                return Err(self.reject(&session, Some(member), err).await);
            }
        };

        let record = NonceCommitment {
            session_id: session.id.clone(),
            participant_id: participant_id.to_string(),
            signer_index,
            commitment: commitment.clone(),
            submitted_at: self.clock.now(),
        };
        let collected = match self.store.record_nonce(&record, session.threshold).await {
            Ok(count) => count,
            Err(StorageError::Duplicate(_)) => {
                let err = EngineError::DuplicateContribution {
                    session_id: session.id.clone(),
                    participant: participant_id.to_string(),
                };
                return Err(self.reject(&session, Some(member), err).await);
            }
            Err(StorageError::CommitmentReused) => {
                let mut entry = self.rejection_entry(&session, Some(member), &EngineError::NonceReuse);
                entry.detail = serde_json::json!({ "commitment_fp": fingerprint(&commitment) });
                return Err(self.reject_with(entry, EngineError::NonceReuse, &session).await);
            }
            Err(StorageError::RoundClosed(_)) => {
                let err = EngineError::RoundClosed(session.id.clone());
                return Err(self.reject(&session, Some(member), err).await);
            }
            Err(e) => return Err(e.into()),
        };

        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::NonceAccepted,
                Severity::Info,
                "NONCE_ACCEPTED",
                record.submitted_at,
            )
            .with_role(member.role)
            .with_detail(serde_json::json!({
                "commitment_fp": fingerprint(&commitment),
                "collected": collected,
            })),
        )
        .await;
        let role = member.role.to_string();
        logging::log_contribution_event("nonce_accepted", &session.id, Some(&role), None);

        let status = if collected >= session.threshold {
            self.try_open_signature_round(&session, &federation).await?
        } else {
            session.status
        };

        Ok(ContributionReceipt {
            session_id: session.id,
            status,
            collected,
            threshold: session.threshold,
            aggregate: None,
        })
    }

    /// Advance `collecting_nonces → collecting_signatures` once the signing
    /// set is complete and a before-signing quorum (if any) is met
    async fn try_open_signature_round(
        &self,
        session: &SigningSession,
        federation: &FederationRecord,
    ) -> Result<SessionStatus> {
        let approval = federation.policy.approval;
        if approval.gates(ApprovalTiming::BeforeSigning) {
            let votes = self.store.votes_for_session(&session.id).await?;
            let tally = approval::evaluate(&approval, federation, &votes);
            match tally.state {
                QuorumState::Satisfied => {}
                QuorumState::Pending => return Ok(SessionStatus::CollectingNonces),
                QuorumState::Rejected => {
                    self.fail(session, federation, FailureReason::QuorumNotMet, None)
                        .await?;
                    return Ok(SessionStatus::Failed);
                }
            }
        }

        self.transition(
            session,
            SessionStatus::CollectingNonces,
            SessionStatus::CollectingSignatures,
        )
        .await?;
        self.current_status(&session.id).await
    }

    /// Signing set commitments, available once round 2 has opened
    pub async fn signing_package(&self, session_id: &str) -> Result<SigningPackageResponse> {
        let session = self.load_live(session_id).await?;
        match session.status {
            SessionStatus::CollectingSignatures
            | SessionStatus::Aggregating
            | SessionStatus::Completed => {}
            SessionStatus::CollectingNonces | SessionStatus::Failed | SessionStatus::Expired => {
                return Err(EngineError::InvalidState {
                    expected: SessionStatus::CollectingSignatures.as_str(),
                    actual: session.status,
                })
            }
        }

        let commitments = self
            .store
            .nonces_for_session(&session.id)
            .await?
            .into_iter()
            .map(|n| (n.signer_index, n.commitment))
            .collect::<BTreeMap<_, _>>();

        Ok(SigningPackageResponse {
            session_id: session.id,
            message_hash: session.message_hash,
            commitments,
        })
    }

    // ------------------------------------------------------------------
    // Round 2
    // ------------------------------------------------------------------

    pub async fn submit_partial_signature(
        &self,
        session_id: &str,
        participant_id: &str,
        share: &str,
    ) -> Result<ContributionReceipt> {
        let session = self.load_live(session_id).await?;
        let federation = self.federation(&session.federation_id).await?;
        let (member, signer_index) = match signer(&federation, participant_id) {
            Ok(found) => found,
            Err(e) => return Err(self.reject(&session, None, e).await),
        };

        if session.status != SessionStatus::CollectingSignatures {
            let err = EngineError::InvalidState {
                expected: SessionStatus::CollectingSignatures.as_str(),
                actual: session.status,
            };
            return Err(self.reject(&session, Some(member), err).await);
        }

        if let Err(e) = aggregation::decode_share(share) {
            let err = EngineError::invalid_input(format!("signature share: {}", e));
            return Err(self.reject(&session, Some(member), err).await);
        }

        let record = PartialSignature {
            session_id: session.id.clone(),
            participant_id: participant_id.to_string(),
            signer_index,
            share: share.to_string(),
            submitted_at: self.clock.now(),
        };
        let collected = match self.store.record_partial_signature(&record).await {
            Ok(count) => count,
            Err(StorageError::Duplicate(_)) => {
                let err = EngineError::DuplicateContribution {
                    session_id: session.id.clone(),
                    participant: participant_id.to_string(),
                };
                return Err(self.reject(&session, Some(member), err).await);
            }
            Err(StorageError::NotFound(_)) => {
                let err = EngineError::MissingNonce {
                    session_id: session.id.clone(),
                    participant: participant_id.to_string(),
                };
                return Err(self.reject(&session, Some(member), err).await);
            }
            Err(e) => return Err(e.into()),
        };

        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::SignatureShareAccepted,
                Severity::Info,
                "SHARE_ACCEPTED",
                record.submitted_at,
            )
            .with_role(member.role)
            .with_detail(serde_json::json!({
                "share_fp": fingerprint(share),
                "collected": collected,
            })),
        )
        .await;
        let role = member.role.to_string();
        logging::log_contribution_event("share_accepted", &session.id, Some(&role), None);

        let aggregate = if collected >= session.threshold {
            Some(self.aggregate_signatures(&session.id).await?)
        } else {
            None
        };

        Ok(ContributionReceipt {
            status: self.current_status(&session.id).await?,
            session_id: session.id,
            collected,
            threshold: session.threshold,
            aggregate,
        })
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    /// Combine the signing set's shares; exactly one caller wins the claim
    pub async fn aggregate_signatures(&self, session_id: &str) -> Result<AggregateOutcome> {
        let session = self.load_live(session_id).await?;
        match session.status {
            SessionStatus::Completed => {
                return Ok(AggregateOutcome::AlreadyCompleted {
                    signature: session.signature.unwrap_or_default(),
                })
            }
            SessionStatus::Aggregating => return Ok(AggregateOutcome::InProgress),
            SessionStatus::CollectingSignatures => {}
            SessionStatus::CollectingNonces | SessionStatus::Failed | SessionStatus::Expired => {
                return Err(EngineError::InvalidState {
                    expected: SessionStatus::CollectingSignatures.as_str(),
                    actual: session.status,
                })
            }
        }

        let shares = self.store.partials_for_session(&session.id).await?;
        let collected = shares.len() as u16;
        if collected < session.threshold {
            return Ok(AggregateOutcome::AwaitingShares {
                collected,
                threshold: session.threshold,
            });
        }

        let federation = self.federation(&session.federation_id).await?;
        let now = self.clock.now();
        let claimed = self
            .store
            .compare_and_set_status(
                &session.id,
                SessionStatus::CollectingSignatures,
                SessionStatus::Aggregating,
                now,
            )
            .await?;
        if !claimed {
            let latest = self.session(&session.id).await?;
            return Ok(match (latest.status, latest.signature) {
                (SessionStatus::Completed, Some(signature)) => {
                    AggregateOutcome::AlreadyCompleted { signature }
                }
                _ => AggregateOutcome::InProgress,
            });
        }
        self.audit_transition(&session, SessionStatus::Aggregating, now)
            .await;

        // From here on the session is ours; no error may leave it aggregating
        let inputs = match session.message_hash_bytes() {
            Ok(hash) => self
                .store
                .nonces_for_session(&session.id)
                .await
                .map(|commitments| (hash, commitments))
                .map_err(EngineError::from),
            Err(e) => Err(EngineError::MalformedRecord(e)),
        };
        let (message_hash, commitments) = match inputs {
            Ok(inputs) => inputs,
            Err(e) => {
                self.fail(
                    &session,
                    &federation,
                    FailureReason::AggregationFailed,
                    Some("aggregation inputs could not be loaded"),
                )
                .await?;
                return Err(e);
            }
        };

        match aggregation::aggregate(&federation, &commitments, &shares, &message_hash) {
            Ok(signature) => {
                let signature = hex::encode(signature);
                let now = self.clock.now();
                let stored = match self
                    .store
                    .complete_session(&session.id, &signature, now)
                    .await
                {
                    Ok(stored) => stored,
                    Err(e) => {
                        self.fail(
                            &session,
                            &federation,
                            FailureReason::AggregationFailed,
                            Some("signature could not be stored"),
                        )
                        .await?;
                        return Err(e.into());
                    }
                };
                if !stored {
                    return self.lost_completion(&session.id).await;
                }
                self.audit_transition(&session, SessionStatus::Completed, now)
                    .await;
                logging::log_session_event(
                    "session_completed",
                    &session.id,
                    serde_json::json!({ "signature_fp": fingerprint(&signature) }),
                );
                Ok(AggregateOutcome::Completed { signature })
            }
            Err(AggregationError::Frost { message, culprit }) => {
                let culprit_role = culprit
                    .as_deref()
                    .and_then(|id| federation.member(id))
                    .map(|m| m.role.to_string());
                let detail = culprit
                    .as_ref()
                    .map(|participant| format!("invalid share from {}", participant));
                self.fail(
                    &session,
                    &federation,
                    FailureReason::AggregationFailed,
                    detail.as_deref(),
                )
                .await?;
                logging::log_security_event(
                    "invalid_signature_share",
                    false,
                    serde_json::json!({ "culprit_role": culprit_role }),
                    Some(&session.id),
                );
                Err(EngineError::AggregationFailed(match culprit {
                    Some(participant) => format!("{} (culprit: {})", message, participant),
                    None => message,
                }))
            }
            Err(AggregationError::Malformed(message)) => {
                self.fail(
                    &session,
                    &federation,
                    FailureReason::AggregationFailed,
                    Some("stored contribution could not be decoded"),
                )
                .await?;
                Err(EngineError::MalformedRecord(message))
            }
        }
    }

    /// The session left `aggregating` under us (expiry sweep); report where
    /// it actually ended up
    async fn lost_completion(&self, session_id: &str) -> Result<AggregateOutcome> {
        let latest = self.session(session_id).await?;
        tracing::warn!(
            target: "federation::session",
            session_id = %session_id,
            status = %latest.status,
            "Aggregated signature discarded, session moved on"
        );
        match (latest.status, latest.signature) {
            (SessionStatus::Completed, Some(signature)) => {
                Ok(AggregateOutcome::AlreadyCompleted { signature })
            }
            (SessionStatus::Expired, _) => Err(EngineError::SessionExpired(session_id.to_string())),
            (status, _) => Err(EngineError::InvalidState {
                expected: SessionStatus::Aggregating.as_str(),
                actual: status,
            }),
        }
    }

    /// Check the stored signature against the directory's group key
    pub async fn verify_aggregated_signature(&self, session_id: &str) -> Result<bool> {
        let session = self.session(session_id).await?;
        let signature = match (&session.status, &session.signature) {
            (SessionStatus::Completed, Some(signature)) => signature.clone(),
            _ => {
                return Err(EngineError::InvalidState {
                    expected: SessionStatus::Completed.as_str(),
                    actual: session.status,
                })
            }
        };

        let federation = self.federation(&session.federation_id).await?;
        let message_hash = session
            .message_hash_bytes()
            .map_err(EngineError::MalformedRecord)?;
        aggregation::verify_signature(&federation, &message_hash, &signature)
            .map_err(|e| EngineError::malformed(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Approval quorum
    // ------------------------------------------------------------------

    pub async fn record_vote(&self, session_id: &str, request: VoteRequest) -> Result<QuorumTally> {
        let session = self.load_live(session_id).await?;
        match session.status {
            SessionStatus::Failed | SessionStatus::Expired => {
                return Err(EngineError::InvalidState {
                    expected: "an open or completed session",
                    actual: session.status,
                })
            }
            SessionStatus::CollectingNonces
            | SessionStatus::CollectingSignatures
            | SessionStatus::Aggregating
            | SessionStatus::Completed => {}
        }

        let federation = self.federation(&session.federation_id).await?;
        let now = self.clock.now();

        let member = match federation.member(&request.voter_id) {
            Some(member) => member,
            None => {
                let err = EngineError::UnknownParticipant(request.voter_id.clone());
                return Err(self.reject_vote(&session, None, err, now).await);
            }
        };
        if !member.role.can_vote() {
            let err = EngineError::invalid_input(format!("{} members cannot vote", member.role));
            return Err(self.reject_vote(&session, Some(member), err, now).await);
        }

        let requirement = federation.policy.mfa_requirement(session.operation_amount);
        match (requirement, &request.mfa) {
            (MfaRequirement::Mandatory, None) => {
                let err = EngineError::MfaVerificationFailed(
                    "physical MFA proof required for this operation".to_string(),
                );
                return Err(self.reject_vote(&session, Some(member), err, now).await);
            }
            (MfaRequirement::Mandatory, Some(_))
            | (MfaRequirement::VerifyIfPresent, _)
            | (MfaRequirement::Skip, _) => {}
        }

        let prior_votes = self.store.votes_for_session(&session.id).await?;
        let policy = federation.policy.approval;
        let prior = approval::evaluate(&policy, &federation, &prior_votes);

        let vote = ApprovalVote {
            session_id: session.id.clone(),
            voter_id: request.voter_id.clone(),
            approved: request.approved,
            mfa: request.mfa,
            reason: request.reason,
            cast_at: now,
        };
        match self.store.record_vote(&vote).await {
            Ok(()) => {}
            Err(StorageError::Duplicate(_)) => {
                let err = EngineError::DuplicateContribution {
                    session_id: session.id.clone(),
                    participant: request.voter_id,
                };
                return Err(self.reject_vote(&session, Some(member), err, now).await);
            }
            Err(e) => return Err(e.into()),
        }

        let mut votes = prior_votes;
        votes.push(vote.clone());
        let tally = approval::evaluate(&policy, &federation, &votes);

        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::VoteRecorded,
                Severity::Info,
                if vote.approved { "APPROVED" } else { "REJECTED" },
                now,
            )
            .with_role(member.role)
            .with_detail(serde_json::json!({
                "approvals": tally.approvals,
                "rejections": tally.rejections,
                "required": tally.required,
                "mfa_present": vote.mfa.is_some(),
            })),
        )
        .await;
        logging::log_approval_event(
            &session.id,
            &member.role.to_string(),
            vote.approved,
            &format!("{:?}", tally.state).to_lowercase(),
        );

        if !policy.is_enabled() {
            return Ok(tally);
        }

        match (prior.state, tally.state) {
            (QuorumState::Rejected, _) => {}
            (_, QuorumState::Rejected) => {
                if session.status.is_terminal() {
                    self.notify_all(
                        &federation,
                        &session,
                        NotificationOutcome::Failed,
                        None,
                        Some(FailureReason::QuorumNotMet.as_str()),
                    )
                    .await;
                } else {
                    self.fail(&session, &federation, FailureReason::QuorumNotMet, None)
                        .await?;
                }
            }
            (_, QuorumState::Satisfied) => {
                if policy.gates(ApprovalTiming::BeforeSigning)
                    && session.status == SessionStatus::CollectingNonces
                {
                    let collected = self.store.nonces_for_session(&session.id).await?.len() as u16;
                    if collected >= session.threshold {
                        self.try_open_signature_round(&session, &federation).await?;
                    }
                }
            }
            (_, QuorumState::Pending) => {}
        }

        Ok(tally)
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// MFA pass, before-publish quorum, publish, then notify every member
    pub async fn finalize_session(&self, session_id: &str) -> Result<FinalizeResponse> {
        let session = self.load_live(session_id).await?;
        if let Some(artifact_id) = &session.artifact_id {
            return Ok(FinalizeResponse {
                session_id: session.id.clone(),
                artifact_id: artifact_id.clone(),
                already_published: true,
            });
        }
        let signature_hex = match (&session.status, &session.signature) {
            (SessionStatus::Completed, Some(signature)) => signature.clone(),
            _ => {
                return Err(EngineError::InvalidState {
                    expected: SessionStatus::Completed.as_str(),
                    actual: session.status,
                })
            }
        };

        let federation = self.federation(&session.federation_id).await?;
        let now = self.clock.now();

        let report = self
            .mfa
            .verify_session(self.store.as_ref(), &session, &federation, now)
            .await?;
        let failed = report.checks.len() - report.verified_count();
        logging::log_mfa_event(
            &session.id,
            &format!("{:?}", report.requirement).to_lowercase(),
            report.verified_count(),
            failed,
        );
        if let Some(reason) = report.blocking_failure() {
            return Err(EngineError::MfaVerificationFailed(reason));
        }

        let policy = federation.policy.approval;
        if policy.gates(ApprovalTiming::BeforePublish) {
            let votes = self.store.votes_for_session(&session.id).await?;
            let tally = approval::evaluate(&policy, &federation, &votes);
            match tally.state {
                QuorumState::Satisfied => {}
                QuorumState::Pending => {
                    return Err(EngineError::QuorumNotMet(format!(
                        "{} of {} approvals",
                        tally.approvals, tally.required
                    )))
                }
                QuorumState::Rejected => {
                    return Err(EngineError::QuorumNotMet(
                        "guardians rejected the operation".to_string(),
                    ))
                }
            }
        }

        let artifact = build_artifact(&session, &federation, &signature_hex)?;
        let artifact_id = match self.publisher.publish(&artifact).await {
            Ok(id) => id,
            Err(e) => {
                self.audit(
                    AuditEntry::new(
                        &session.id,
                        AuditEvent::PublishFailed,
                        Severity::Warning,
                        "PUBLISH_FAILED",
                        now,
                    )
                    .with_detail(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
                logging::log_publish_event(
                    "publish_failed",
                    &session.id,
                    None,
                    false,
                    Some(&e.to_string()),
                );
                return Err(EngineError::PublishFailed(e.to_string()));
            }
        };

        if !self
            .store
            .set_artifact_id(&session.id, &artifact_id, self.clock.now())
            .await?
        {
            // A concurrent finalize stored its id first
            let latest = self.session(&session.id).await?;
            return Ok(FinalizeResponse {
                session_id: session.id,
                artifact_id: latest.artifact_id.unwrap_or(artifact_id),
                already_published: true,
            });
        }

        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::ArtifactPublished,
                Severity::Info,
                "ARTIFACT_PUBLISHED",
                now,
            )
            .with_detail(serde_json::json!({
                "operation_kind": session.operation_kind(),
                "artifact_fp": fingerprint(&artifact_id),
            })),
        )
        .await;
        logging::log_publish_event("artifact_published", &session.id, Some(&artifact_id), true, None);

        self.notify_all(
            &federation,
            &session,
            NotificationOutcome::Published,
            Some(&artifact_id),
            None,
        )
        .await;

        Ok(FinalizeResponse {
            session_id: session.id,
            artifact_id,
            already_published: false,
        })
    }

    // ------------------------------------------------------------------
    // Read side and expiry
    // ------------------------------------------------------------------

    pub async fn session_status(&self, session_id: &str) -> Result<SessionView> {
        let session = match self.load_live(session_id).await {
            Ok(session) => session,
            Err(EngineError::SessionExpired(_)) => self.session(session_id).await?,
            Err(e) => return Err(e),
        };
        let federation = self.federation(&session.federation_id).await?;
        let nonces = self.store.nonces_for_session(&session.id).await?;
        let shares = self.store.partials_for_session(&session.id).await?;

        let contributor_roles = nonces
            .iter()
            .filter_map(|n| federation.member(&n.participant_id))
            .map(|m| m.role.to_string())
            .collect();

        let policy = federation.policy.approval;
        let quorum = if policy.is_enabled() {
            let votes = self.store.votes_for_session(&session.id).await?;
            Some(approval::evaluate(&policy, &federation, &votes))
        } else {
            None
        };

        Ok(SessionView {
            operation_kind: session.operation_kind(),
            session_id: session.id,
            federation_id: session.federation_id,
            status: session.status,
            threshold: session.threshold,
            participant_count: session.participant_count,
            nonces_collected: nonces.len() as u16,
            shares_collected: shares.len() as u16,
            contributor_roles,
            quorum,
            created_at: session.created_at,
            expires_at: session.expires_at,
            artifact_id: session.artifact_id,
            failure_reason: session.failure_reason,
        })
    }

    pub async fn audit_trail(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        self.session(session_id).await?;
        Ok(self.store.audit_for_session(session_id).await?)
    }

    /// Move every overdue session to its terminal state
    pub async fn expire_stale_sessions(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        for session in self.store.list_past_deadline(now).await? {
            match self.retire(&session, now).await {
                Ok(Some(SessionStatus::Failed)) => report.failed += 1,
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        target: "federation::session",
                        session_id = %session.id,
                        error = %e,
                        "Failed to retire overdue session"
                    );
                }
            }
        }

        if report.expired + report.failed > 0 {
            logging::log_system_event(
                "expiry_sweep",
                serde_json::json!({ "expired": report.expired, "failed": report.failed }),
            );
        }
        Ok(report)
    }

    /// Terminal state for an overdue session
    ///
    /// A session whose signing set was complete but was held back by an
    /// unmet before-signing quorum fails with `quorum_not_met`; every other
    /// overdue session expires. Returns `None` if another caller got there
    /// first.
    async fn retire(&self, session: &SigningSession, now: u64) -> Result<Option<SessionStatus>> {
        let federation = self.federation(&session.federation_id).await?;
        let policy = federation.policy.approval;

        let blocked_by_quorum = policy.gates(ApprovalTiming::BeforeSigning)
            && session.status == SessionStatus::CollectingNonces
            && self.store.nonces_for_session(&session.id).await?.len() as u16 >= session.threshold;

        if blocked_by_quorum {
            let moved = self
                .fail(session, &federation, FailureReason::QuorumNotMet, Some("quorum unmet at deadline"))
                .await?;
            return Ok(moved.then_some(SessionStatus::Failed));
        }

        if !self.store.expire_session(&session.id, now).await? {
            return Ok(None);
        }
        self.audit_transition(session, SessionStatus::Expired, now)
            .await;
        logging::log_session_event(
            "session_expired",
            &session.id,
            serde_json::json!({ "from": session.status }),
        );
        self.notify_all(
            &federation,
            session,
            NotificationOutcome::Expired,
            None,
            Some("SESSION_EXPIRED"),
        )
        .await;
        Ok(Some(SessionStatus::Expired))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn session(&self, session_id: &str) -> Result<SigningSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    async fn current_status(&self, session_id: &str) -> Result<SessionStatus> {
        Ok(self.session(session_id).await?.status)
    }

    /// Load a session, retiring it first if its deadline has passed
    async fn load_live(&self, session_id: &str) -> Result<SigningSession> {
        let session = self.session(session_id).await?;
        let now = self.clock.now();
        if session.is_past_deadline(now) {
            self.retire(&session, now).await?;
            let latest = self.session(session_id).await?;
            return match latest.status {
                SessionStatus::Expired => Err(EngineError::SessionExpired(session_id.to_string())),
                _ => Ok(latest),
            };
        }
        if session.status == SessionStatus::Expired {
            return Err(EngineError::SessionExpired(session_id.to_string()));
        }
        Ok(session)
    }

    async fn federation(&self, federation_id: &str) -> Result<FederationRecord> {
        self.directory
            .get(federation_id)
            .await
            .ok_or_else(|| EngineError::FederationNotFound(federation_id.to_string()))
    }

    async fn transition(
        &self,
        session: &SigningSession,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool> {
        let now = self.clock.now();
        let moved = self
            .store
            .compare_and_set_status(&session.id, from, to, now)
            .await?;
        if moved {
            self.audit_transition(session, to, now).await;
            logging::log_session_event(
                "state_transition",
                &session.id,
                serde_json::json!({ "from": from, "to": to }),
            );
        }
        Ok(moved)
    }

    /// Fail a non-terminal session and tell every member; false if it was
    /// already terminal
    async fn fail(
        &self,
        session: &SigningSession,
        federation: &FederationRecord,
        reason: FailureReason,
        detail: Option<&str>,
    ) -> Result<bool> {
        let now = self.clock.now();
        if !self
            .store
            .fail_session(&session.id, reason, detail, now)
            .await?
        {
            return Ok(false);
        }

        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::StateTransition,
                Severity::Warning,
                reason.as_str(),
                now,
            )
            .with_detail(serde_json::json!({ "from": session.status, "to": SessionStatus::Failed })),
        )
        .await;
        logging::log_session_event(
            "session_failed",
            &session.id,
            serde_json::json!({ "reason": reason }),
        );
        self.notify_all(
            federation,
            session,
            NotificationOutcome::Failed,
            None,
            Some(reason.as_str()),
        )
        .await;
        Ok(true)
    }

    async fn notify_all(
        &self,
        federation: &FederationRecord,
        session: &SigningSession,
        outcome: NotificationOutcome,
        artifact_id: Option<&str>,
        reason_code: Option<&str>,
    ) {
        for member in &federation.roster {
            let notification = Notification {
                recipient: member.participant_id.clone(),
                session_id: session.id.clone(),
                federation_id: federation.federation_id.clone(),
                outcome,
                artifact_id: artifact_id.map(str::to_string),
                reason_code: reason_code.map(str::to_string),
            };
            if let Err(e) = self.notifier.notify(&notification).await {
                self.audit(
                    AuditEntry::new(
                        &session.id,
                        AuditEvent::NotificationFailed,
                        Severity::Warning,
                        "NOTIFICATION_FAILED",
                        self.clock.now(),
                    )
                    .with_role(member.role)
                    .with_detail(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
                logging::log_publish_event(
                    "notification_failed",
                    &session.id,
                    artifact_id,
                    false,
                    Some(&e.to_string()),
                );
            }
        }
    }

    /// Audit writes never abort the operation that produced them
    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::error!(
                target: "federation::session",
                session_id = %entry.session_id,
                event = entry.event.as_str(),
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    async fn audit_transition(&self, session: &SigningSession, to: SessionStatus, now: u64) {
        self.audit(
            AuditEntry::new(
                &session.id,
                AuditEvent::StateTransition,
                Severity::Info,
                to.as_str(),
                now,
            )
            .with_detail(serde_json::json!({ "to": to })),
        )
        .await;
    }

    fn rejection_entry(
        &self,
        session: &SigningSession,
        member: Option<&RosterMember>,
        err: &EngineError,
    ) -> AuditEntry {
        let severity = if err.is_security_critical() {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let entry = AuditEntry::new(
            &session.id,
            AuditEvent::ContributionRejected,
            severity,
            err.error_code(),
            self.clock.now(),
        );
        match member {
            Some(member) => entry.with_role(member.role),
            None => entry,
        }
    }

    async fn reject(
        &self,
        session: &SigningSession,
        member: Option<&RosterMember>,
        err: EngineError,
    ) -> EngineError {
        let entry = self.rejection_entry(session, member, &err);
        self.reject_with(entry, err, session).await
    }

    async fn reject_with(
        &self,
        entry: AuditEntry,
        err: EngineError,
        session: &SigningSession,
    ) -> EngineError {
        let role = entry.actor_role.clone();
        self.audit(entry).await;
        let message = err.public_message();
        logging::log_contribution_event(
            "contribution_rejected",
            &session.id,
            role.as_deref(),
            Some((err.error_code(), message.as_str())),
        );
        if err.is_security_critical() {
            logging::log_security_event(
                err.error_code(),
                false,
                serde_json::json!({ "role": role }),
                Some(&session.id),
            );
        }
        err
    }

    async fn reject_vote(
        &self,
        session: &SigningSession,
        member: Option<&RosterMember>,
        err: EngineError,
        now: u64,
    ) -> EngineError {
        let severity = if err.is_security_critical() {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let mut entry = AuditEntry::new(
            &session.id,
            AuditEvent::VoteRejected,
            severity,
            err.error_code(),
            now,
        );
        if let Some(member) = member {
            entry = entry.with_role(member.role);
        }
        let role = entry.actor_role.clone();
        self.audit(entry).await;
        if err.is_security_critical() {
            logging::log_security_event(
                err.error_code(),
                false,
                serde_json::json!({ "role": role }),
                Some(&session.id),
            );
        }
        err
    }
}

/// Roster member holding a key share
fn signer<'a>(
    federation: &'a FederationRecord,
    participant_id: &str,
) -> Result<(&'a RosterMember, u16)> {
    federation
        .member(participant_id)
        .and_then(|m| m.signer_index.map(|index| (m, index)))
        .ok_or_else(|| EngineError::UnknownParticipant(participant_id.to_string()))
}

fn build_artifact(
    session: &SigningSession,
    federation: &FederationRecord,
    signature_hex: &str,
) -> Result<SignedArtifact> {
    let group_key = federation
        .group_public_key()
        .map_err(|e| EngineError::malformed(e.to_string()))?;

    match &session.payload {
        SigningPayload::NostrEvent(template) => {
            let signature: [u8; 64] = hex::decode(signature_hex)
                .map_err(|e| EngineError::malformed(e.to_string()))?
                .try_into()
                .map_err(|_| EngineError::malformed("signature must be 64 bytes"))?;
            let event = nostr::signed_event(&group_key, template, &signature)
                .map_err(|e| EngineError::malformed(e.to_string()))?;
            Ok(SignedArtifact::NostrEvent { event })
        }
        SigningPayload::Payment(intent) => {
            Ok(SignedArtifact::PaymentAuthorization(PaymentAuthorization {
                session_id: session.id.clone(),
                federation_id: federation.federation_id.clone(),
                group_public_key: hex::encode(group_key),
                intent: intent.clone(),
                message_hash: session.message_hash.clone(),
                signature: signature_hex.to_string(),
            }))
        }
    }
}
