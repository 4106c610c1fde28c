//! Federation-level policy values
//!
//! Policies are plain tagged enums. Every call site matches them exhaustively
//! so adding a mode forces each decision point to be revisited.

use serde::{Deserialize, Serialize};

/// Physical-MFA policy configured per federation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MfaPolicy {
    /// Never verify card taps
    #[default]
    Disabled,
    /// Verify taps that are present, never block on them
    Optional,
    /// Every approval vote must carry a valid tap
    Required,
    /// `Required` when the amount exceeds the high-value threshold or is unknown
    RequiredAboveThreshold,
}

/// What the MFA layer must do for one concrete operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaRequirement {
    Skip,
    VerifyIfPresent,
    Mandatory,
}

impl MfaPolicy {
    /// Resolve the policy for an operation amount
    ///
    /// An unknown amount under `RequiredAboveThreshold` resolves to
    /// `Mandatory`.
    pub fn requirement(&self, amount: Option<u64>, high_value_threshold: u64) -> MfaRequirement {
        match self {
            MfaPolicy::Disabled => MfaRequirement::Skip,
            MfaPolicy::Optional => MfaRequirement::VerifyIfPresent,
            MfaPolicy::Required => MfaRequirement::Mandatory,
            MfaPolicy::RequiredAboveThreshold => match amount {
                Some(value) if value <= high_value_threshold => MfaRequirement::VerifyIfPresent,
                Some(_) | None => MfaRequirement::Mandatory,
            },
        }
    }
}

impl std::fmt::Display for MfaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Optional => "optional",
            Self::Required => "required",
            Self::RequiredAboveThreshold => "required-above-threshold",
        };
        write!(f, "{}", s)
    }
}

/// How "no" votes interact with the approval quorum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VetoPolicy {
    /// Only yes votes count; a rejection matters only once the quorum
    /// becomes arithmetically unreachable
    SimpleQuorum,
    /// A single rejection from any eligible voter fails the session
    AnyRejectionVetoes,
}

/// Which point of the session the quorum gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalTiming {
    /// Nonce collection cannot advance until the quorum is met
    BeforeSigning,
    /// Signing runs freely; the artifact is withheld until the quorum is met
    BeforePublish,
}

/// Guardian/steward approval requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Yes votes needed; zero disables the gate
    pub required_approvals: u16,
    pub veto: VetoPolicy,
    pub timing: ApprovalTiming,
}

impl ApprovalPolicy {
    pub fn disabled() -> Self {
        Self {
            required_approvals: 0,
            veto: VetoPolicy::SimpleQuorum,
            timing: ApprovalTiming::BeforePublish,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.required_approvals > 0
    }

    pub fn gates(&self, timing: ApprovalTiming) -> bool {
        self.is_enabled() && self.timing == timing
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-federation configuration, changed only through governance actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationPolicy {
    #[serde(default)]
    pub mfa_policy: MfaPolicy,
    /// Amount above which `RequiredAboveThreshold` escalates
    #[serde(default)]
    pub high_value_threshold: u64,
    #[serde(default)]
    pub approval: ApprovalPolicy,
}

impl Default for FederationPolicy {
    fn default() -> Self {
        Self {
            mfa_policy: MfaPolicy::Disabled,
            high_value_threshold: 0,
            approval: ApprovalPolicy::disabled(),
        }
    }
}

impl FederationPolicy {
    pub fn mfa_requirement(&self, amount: Option<u64>) -> MfaRequirement {
        self.mfa_policy.requirement(amount, self.high_value_threshold)
    }
}
