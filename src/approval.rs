//! Approval quorum gate
//!
//! Guardians and stewards vote on each session. The quorum either gates the
//! advance into the signature round or the release of the finished artifact,
//! depending on the federation policy.

use crate::federation::FederationRecord;
use crate::mfa::PhysicalMfaSignature;
use crate::policy::{ApprovalPolicy, VetoPolicy};
use serde::{Deserialize, Serialize};

/// One guardian/steward vote; immutable once recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub session_id: String,
    pub voter_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa: Option<PhysicalMfaSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub cast_at: u64,
}

/// Current standing of the quorum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumState {
    Pending,
    Satisfied,
    Rejected,
}

/// Tally over eligible votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumTally {
    pub approvals: u16,
    pub rejections: u16,
    pub required: u16,
    pub eligible: u16,
    pub state: QuorumState,
}

/// Evaluate the quorum for a set of votes
///
/// Votes from members who cannot vote are ignored; the coordinator already
/// refuses them at submission.
pub fn evaluate(
    policy: &ApprovalPolicy,
    federation: &FederationRecord,
    votes: &[ApprovalVote],
) -> QuorumTally {
    let eligible = federation.voter_count();
    let mut approvals = 0u16;
    let mut rejections = 0u16;
    for vote in votes {
        let can_vote = federation
            .member(&vote.voter_id)
            .map(|m| m.role.can_vote())
            .unwrap_or(false);
        if !can_vote {
            continue;
        }
        if vote.approved {
            approvals += 1;
        } else {
            rejections += 1;
        }
    }

    let required = policy.required_approvals;
    let state = if !policy.is_enabled() {
        QuorumState::Satisfied
    } else {
        match policy.veto {
            VetoPolicy::AnyRejectionVetoes if rejections > 0 => QuorumState::Rejected,
            VetoPolicy::AnyRejectionVetoes | VetoPolicy::SimpleQuorum => {
                let outstanding = eligible.saturating_sub(approvals + rejections);
                if approvals >= required {
                    QuorumState::Satisfied
                } else if approvals + outstanding < required {
                    QuorumState::Rejected
                } else {
                    QuorumState::Pending
                }
            }
        }
    };

    QuorumTally {
        approvals,
        rejections,
        required,
        eligible,
        state,
    }
}
