//! Federation directory
//!
//! The directory is the authoritative source of a federation's roster, group
//! public key and policy. The coordinator only reads from it; public keys are
//! never taken from request parameters.

use crate::policy::FederationPolicy;
use async_trait::async_trait;
use frost_secp256k1_tr as frost;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid directory file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not encode directory: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid federation record {0}: {1}")]
    InvalidRecord(String, String),
}

/// Role of a federation member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationRole {
    Guardian,
    Steward,
    Adult,
    Offspring,
}

impl FederationRole {
    /// Guardians and stewards cast approval votes
    pub fn can_vote(&self) -> bool {
        matches!(self, FederationRole::Guardian | FederationRole::Steward)
    }
}

impl std::fmt::Display for FederationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Guardian => "guardian",
            Self::Steward => "steward",
            Self::Adult => "adult",
            Self::Offspring => "offspring",
        };
        write!(f, "{}", s)
    }
}

/// Registered tap-to-sign card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaDevice {
    pub device_id: String,
    /// SEC1-encoded P-256 public key (hex)
    pub public_key: String,
}

/// One member of the federation roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub participant_id: String,
    pub role: FederationRole,
    /// FROST identifier index (1-based); `None` for members without a key share
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_device: Option<MfaDevice>,
}

/// Authoritative federation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRecord {
    pub federation_id: String,
    #[serde(default)]
    pub name: String,
    /// Serialized FROST public key package (hex)
    pub public_key_package: String,
    /// Minimum signers fixed at key generation
    pub key_threshold: u16,
    #[serde(default)]
    pub policy: FederationPolicy,
    pub roster: Vec<RosterMember>,
}

impl FederationRecord {
    pub fn member(&self, participant_id: &str) -> Option<&RosterMember> {
        self.roster
            .iter()
            .find(|m| m.participant_id == participant_id)
    }

    /// Members holding a key share
    pub fn signers(&self) -> impl Iterator<Item = &RosterMember> {
        self.roster.iter().filter(|m| m.signer_index.is_some())
    }

    pub fn signer_count(&self) -> u16 {
        self.signers().count() as u16
    }

    /// Members allowed to vote on approvals
    pub fn voters(&self) -> impl Iterator<Item = &RosterMember> {
        self.roster.iter().filter(|m| m.role.can_vote())
    }

    pub fn voter_count(&self) -> u16 {
        self.voters().count() as u16
    }

    /// FROST identifier for a signer index
    pub fn frost_identifier(signer_index: u16) -> Result<frost::Identifier, DirectoryError> {
        frost::Identifier::try_from(signer_index).map_err(|e| {
            DirectoryError::InvalidRecord(format!("signer {}", signer_index), e.to_string())
        })
    }

    /// Decode the public key package
    pub fn public_key_package(&self) -> Result<frost::keys::PublicKeyPackage, DirectoryError> {
        let bytes = hex::decode(&self.public_key_package)
            .map_err(|e| DirectoryError::InvalidRecord(self.federation_id.clone(), e.to_string()))?;
        frost::keys::PublicKeyPackage::deserialize(&bytes)
            .map_err(|e| DirectoryError::InvalidRecord(self.federation_id.clone(), e.to_string()))
    }

    /// Group public key (x-only, 32 bytes), the federation's outward identity
    pub fn group_public_key(&self) -> Result<[u8; 32], DirectoryError> {
        let package = self.public_key_package()?;
        let serialized = package
            .verifying_key()
            .serialize()
            .map_err(|e| DirectoryError::InvalidRecord(self.federation_id.clone(), e.to_string()))?;
        if serialized.len() != 33 {
            return Err(DirectoryError::InvalidRecord(
                self.federation_id.clone(),
                format!("verifying key is {} bytes", serialized.len()),
            ));
        }
        // First byte is the parity, remaining 32 are the x-coordinate
        let mut x_only = [0u8; 32];
        x_only.copy_from_slice(&serialized[1..33]);
        Ok(x_only)
    }

    /// Structural checks run when a record enters the directory
    pub fn validate(&self) -> Result<(), DirectoryError> {
        let invalid = |msg: String| DirectoryError::InvalidRecord(self.federation_id.clone(), msg);

        let package = self.public_key_package()?;
        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_indexes = std::collections::HashSet::new();
        for member in &self.roster {
            if !seen_ids.insert(member.participant_id.as_str()) {
                return Err(invalid(format!("duplicate member {}", member.participant_id)));
            }
            if let Some(index) = member.signer_index {
                if !seen_indexes.insert(index) {
                    return Err(invalid(format!("duplicate signer index {}", index)));
                }
                let identifier = Self::frost_identifier(index)?;
                if !package.verifying_shares().contains_key(&identifier) {
                    return Err(invalid(format!("signer index {} has no verifying share", index)));
                }
            }
        }

        let signers = self.signer_count();
        if self.key_threshold < 2 || self.key_threshold > signers || signers > 7 {
            return Err(invalid(format!(
                "key threshold {} of {} signers is outside 2..=7",
                self.key_threshold, signers
            )));
        }
        Ok(())
    }
}

/// Read-only view of the identity/federation directory
#[async_trait]
pub trait FederationDirectory: Send + Sync {
    async fn get(&self, federation_id: &str) -> Option<FederationRecord>;
}

/// On-disk directory file format
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub federations: Vec<FederationRecord>,
}

/// Directory held in memory, loaded from a TOML file
#[derive(Default)]
pub struct StaticDirectory {
    records: RwLock<HashMap<String, FederationRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from records, validating each
    pub fn from_records(
        records: impl IntoIterator<Item = FederationRecord>,
    ) -> Result<Self, DirectoryError> {
        let mut map = HashMap::new();
        for record in records {
            record.validate()?;
            map.insert(record.federation_id.clone(), record);
        }
        Ok(Self {
            records: RwLock::new(map),
        })
    }

    /// Load a directory file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let file: DirectoryFile = toml::from_str(&contents)?;
        let directory = Self::from_records(file.federations)?;

        tracing::info!(
            path = %path.as_ref().display(),
            "Loaded federation directory"
        );
        Ok(directory)
    }

    /// Governance action: add or replace a federation record
    pub async fn upsert(&self, record: FederationRecord) -> Result<(), DirectoryError> {
        record.validate()?;
        tracing::info!(
            federation_id = %record.federation_id,
            members = record.roster.len(),
            "Federation record updated"
        );
        self.records
            .write()
            .await
            .insert(record.federation_id.clone(), record);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl FederationDirectory for StaticDirectory {
    async fn get(&self, federation_id: &str) -> Option<FederationRecord> {
        self.records.read().await.get(federation_id).cloned()
    }
}

/// Write a directory file
pub fn save_directory(path: impl AsRef<Path>, file: &DirectoryFile) -> Result<(), DirectoryError> {
    let contents = toml::to_string_pretty(file)?;
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
