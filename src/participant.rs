//! Guardian side of the signing protocol
//!
//! A guardian holds one key share and talks to the coordinator in two rounds:
//! publish a nonce commitment, then sign the package the coordinator returns.
//! Nonces live only in memory and are consumed by the first signature.

use crate::keystore::UnsealedShare;
use crate::mfa::PhysicalMfaSignature;
use crate::approval::QuorumTally;
use crate::types::{
    ContributionReceipt, CreateSessionRequest, ErrorResponse, NonceSubmission, SessionView,
    ShareSubmission, SigningPackageResponse, VoteRequest,
};
use frost_secp256k1_tr as frost;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("message hash must be 32 bytes")]
    InvalidMessageHash,
    #[error("already committed for session {0}")]
    AlreadyCommitted(String),
    #[error("no pending nonces for session {0}")]
    NoPendingNonces(String),
    #[error("signing package does not contain our commitment")]
    CommitmentMismatch,
    #[error("FROST error: {0}")]
    Frost(String),
    #[error("nonce state lock poisoned")]
    Poisoned,
    #[error("coordinator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("coordinator rejected request: {code}: {message}")]
    Rejected { code: String, message: String },
}

/// Round-1 state kept until the share is produced
struct PendingRound {
    nonces: frost::round1::SigningNonces,
    commitment: String,
}

/// Signs on behalf of one guardian
pub struct GuardianSigner {
    share: UnsealedShare,
    pending: Mutex<HashMap<String, PendingRound>>,
}

impl GuardianSigner {
    pub fn new(share: UnsealedShare) -> Self {
        Self {
            share,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.share.participant_id
    }

    pub fn federation_id(&self) -> &str {
        &self.share.federation_id
    }

    pub fn signer_index(&self) -> u16 {
        self.share.signer_index
    }

    /// x-only group key this share belongs to
    pub fn group_public_key(&self) -> Result<[u8; 32], GuardianError> {
        let serialized = self
            .share
            .public_key_package
            .verifying_key()
            .serialize()
            .map_err(|e| GuardianError::Frost(e.to_string()))?;
        serialized
            .get(1..33)
            .and_then(|x| x.try_into().ok())
            .ok_or_else(|| GuardianError::Frost("unexpected verifying key length".to_string()))
    }

    /// Round 1: fresh nonces for the session
    pub fn commit(&self, session_id: &str) -> Result<NonceSubmission, GuardianError> {
        let mut pending = self.pending.lock().map_err(|_| GuardianError::Poisoned)?;
        if pending.contains_key(session_id) {
            return Err(GuardianError::AlreadyCommitted(session_id.to_string()));
        }

        let mut rng = rand::thread_rng();
        let (nonces, commitments) =
            frost::round1::commit(self.share.key_package.signing_share(), &mut rng);
        let commitment = hex::encode(
            commitments
                .serialize()
                .map_err(|e| GuardianError::Frost(e.to_string()))?,
        );

        pending.insert(
            session_id.to_string(),
            PendingRound {
                nonces,
                commitment: commitment.clone(),
            },
        );

        tracing::debug!(
            signer_index = self.share.signer_index,
            session_id,
            "Generated nonce commitment"
        );

        Ok(NonceSubmission {
            participant_id: self.share.participant_id.clone(),
            commitment,
        })
    }

    /// Round 2: sign the coordinator's package
    ///
    /// The nonces are removed before signing, so a second call for the same
    /// session fails even if the first one did.
    pub fn sign(&self, package: &SigningPackageResponse) -> Result<ShareSubmission, GuardianError> {
        let round = self
            .pending
            .lock()
            .map_err(|_| GuardianError::Poisoned)?
            .remove(&package.session_id)
            .ok_or_else(|| GuardianError::NoPendingNonces(package.session_id.clone()))?;

        if package.commitments.get(&self.share.signer_index) != Some(&round.commitment) {
            return Err(GuardianError::CommitmentMismatch);
        }

        let message_hash: [u8; 32] = hex::decode(&package.message_hash)
            .map_err(|e| GuardianError::InvalidHex(e.to_string()))?
            .try_into()
            .map_err(|_| GuardianError::InvalidMessageHash)?;

        let mut commitments = BTreeMap::new();
        for (index, commitment_hex) in &package.commitments {
            let identifier = frost::Identifier::try_from(*index)
                .map_err(|e| GuardianError::Frost(e.to_string()))?;
            let bytes =
                hex::decode(commitment_hex).map_err(|e| GuardianError::InvalidHex(e.to_string()))?;
            let commitment = frost::round1::SigningCommitments::deserialize(&bytes)
                .map_err(|e| GuardianError::Frost(e.to_string()))?;
            commitments.insert(identifier, commitment);
        }

        let signing_package = frost::SigningPackage::new(commitments, &message_hash);
        let share = frost::round2::sign(&signing_package, &round.nonces, &self.share.key_package)
            .map_err(|e| GuardianError::Frost(e.to_string()))?;

        tracing::debug!(
            signer_index = self.share.signer_index,
            session_id = %package.session_id,
            "Generated signature share"
        );

        Ok(ShareSubmission {
            participant_id: self.share.participant_id.clone(),
            share: hex::encode(share.serialize()),
        })
    }

    /// Drop nonces for a session that will not reach round 2
    pub fn abandon(&self, session_id: &str) -> Result<bool, GuardianError> {
        Ok(self
            .pending
            .lock()
            .map_err(|_| GuardianError::Poisoned)?
            .remove(session_id)
            .is_some())
    }

    pub fn pending_sessions(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// HTTP client for the coordinator API
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GuardianError> {
        if resp.status().is_success() {
            return Ok(resp.json().await?);
        }
        let status = resp.status();
        match resp.json::<ErrorResponse>().await {
            Ok(err) => Err(GuardianError::Rejected {
                code: err.code,
                message: err.message,
            }),
            Err(_) => Err(GuardianError::Rejected {
                code: status.as_u16().to_string(),
                message: status.to_string(),
            }),
        }
    }

    /// Open a session; returns the coordinator's summary as JSON
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<serde_json::Value, GuardianError> {
        let resp = self
            .client
            .post(self.url("/sessions"))
            .json(request)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionView, GuardianError> {
        let resp = self
            .client
            .get(self.url(&format!("/sessions/{}", session_id)))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn submit_nonce(
        &self,
        session_id: &str,
        submission: &NonceSubmission,
    ) -> Result<ContributionReceipt, GuardianError> {
        let resp = self
            .client
            .post(self.url(&format!("/sessions/{}/nonces", session_id)))
            .json(submission)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn signing_package(
        &self,
        session_id: &str,
    ) -> Result<SigningPackageResponse, GuardianError> {
        let resp = self
            .client
            .get(self.url(&format!("/sessions/{}/signing-package", session_id)))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn submit_share(
        &self,
        session_id: &str,
        submission: &ShareSubmission,
    ) -> Result<ContributionReceipt, GuardianError> {
        let resp = self
            .client
            .post(self.url(&format!("/sessions/{}/signatures", session_id)))
            .json(submission)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn vote(
        &self,
        session_id: &str,
        voter_id: &str,
        approved: bool,
        mfa: Option<PhysicalMfaSignature>,
    ) -> Result<QuorumTally, GuardianError> {
        let request = VoteRequest {
            voter_id: voter_id.to_string(),
            approved,
            reason: None,
            mfa,
        };
        let resp = self
            .client
            .post(self.url(&format!("/sessions/{}/votes", session_id)))
            .json(&request)
            .send()
            .await?;
        Self::decode(resp).await
    }
}
