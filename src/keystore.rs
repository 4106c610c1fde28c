//! Guardian key share storage
//!
//! Each guardian keeps their FROST share in a local file encrypted with
//! AES-256-GCM under a passphrase-derived key. The coordinator never reads
//! these files.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use frost_secp256k1_tr as frost;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FORMAT_VERSION: u8 = 2;
const KDF_DOMAIN: &[u8] = b"federation-keystore-v2";
/// Passphrase hashing rounds
const KDF_ROUNDS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("corrupt key file: {0}")]
    Corrupt(String),
    #[error("FROST error: {0}")]
    Frost(String),
    #[error("key file not found: {0}")]
    KeyNotFound(PathBuf),
    #[error("key file belongs to {found}, expected {expected}")]
    OwnerMismatch { expected: String, found: String },
    #[error("wrong passphrase or tampered key file")]
    InvalidPassword,
}

/// On-disk format; everything but the ciphertext is public metadata
#[derive(Debug, Serialize, Deserialize)]
struct SealedShareFile {
    version: u8,
    federation_id: String,
    participant_id: String,
    signer_index: u16,
    salt: String,
    nonce: String,
    ciphertext: String,
    /// x-only group key, readable without the passphrase
    group_public_key: String,
}

#[derive(Serialize, Deserialize)]
struct ShareMaterial {
    key_package: Vec<u8>,
    public_key_package: Vec<u8>,
}

/// Decrypted share held in memory by a guardian
pub struct UnsealedShare {
    pub federation_id: String,
    pub participant_id: String,
    pub signer_index: u16,
    pub key_package: frost::keys::KeyPackage,
    pub public_key_package: frost::keys::PublicKeyPackage,
}

impl std::fmt::Debug for UnsealedShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsealedShare")
            .field("federation_id", &self.federation_id)
            .field("participant_id", &self.participant_id)
            .field("signer_index", &self.signer_index)
            .finish_non_exhaustive()
    }
}

/// One guardian's encrypted key file
pub struct Keystore {
    path: PathBuf,
    participant_id: String,
}

impl Keystore {
    pub fn new(path: impl AsRef<Path>, participant_id: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            participant_id: participant_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Stretch the passphrase with iterated SHA-256
    fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
        let mut digest: [u8; 32] = Sha256::new()
            .chain_update(KDF_DOMAIN)
            .chain_update(salt)
            .chain_update(passphrase.as_bytes())
            .finalize()
            .into();
        for _ in 1..KDF_ROUNDS {
            digest = Sha256::new()
                .chain_update(digest)
                .chain_update(salt)
                .finalize()
                .into();
        }
        digest
    }

    /// Encrypt and write the share
    pub fn seal(
        &self,
        federation_id: &str,
        signer_index: u16,
        key_package: &frost::keys::KeyPackage,
        public_key_package: &frost::keys::PublicKeyPackage,
        passphrase: &str,
    ) -> Result<(), KeystoreError> {
        let material = ShareMaterial {
            key_package: key_package
                .serialize()
                .map_err(|e| KeystoreError::Frost(e.to_string()))?,
            public_key_package: public_key_package
                .serialize()
                .map_err(|e| KeystoreError::Frost(e.to_string()))?,
        };
        let plaintext = serde_json::to_vec(&material)?;

        let mut salt = [0u8; 16];
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = Self::derive_key(passphrase, &salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| KeystoreError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| KeystoreError::Encryption(e.to_string()))?;

        let group_key = public_key_package
            .verifying_key()
            .serialize()
            .map_err(|e| KeystoreError::Frost(e.to_string()))?;
        let x_only = group_key.get(1..33).ok_or_else(|| {
            KeystoreError::Frost(format!("verifying key is {} bytes", group_key.len()))
        })?;

        let sealed = SealedShareFile {
            version: FORMAT_VERSION,
            federation_id: federation_id.to_string(),
            participant_id: self.participant_id.clone(),
            signer_index,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
            group_public_key: hex::encode(x_only),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&sealed)?)?;

        tracing::info!(
            federation_id,
            signer_index,
            path = %self.path.display(),
            "Sealed guardian key share"
        );
        Ok(())
    }

    fn read_sealed(&self) -> Result<SealedShareFile, KeystoreError> {
        if !self.exists() {
            return Err(KeystoreError::KeyNotFound(self.path.clone()));
        }
        let sealed: SealedShareFile = serde_json::from_str(&std::fs::read_to_string(&self.path)?)?;
        if sealed.version != FORMAT_VERSION {
            return Err(KeystoreError::Corrupt(format!(
                "unsupported version {}",
                sealed.version
            )));
        }
        if sealed.participant_id != self.participant_id {
            return Err(KeystoreError::OwnerMismatch {
                expected: self.participant_id.clone(),
                found: sealed.participant_id,
            });
        }
        Ok(sealed)
    }

    /// Decrypt the share
    pub fn unseal(&self, passphrase: &str) -> Result<UnsealedShare, KeystoreError> {
        let sealed = self.read_sealed()?;
        let decode = |field: &str, value: &str| {
            hex::decode(value).map_err(|e| KeystoreError::Corrupt(format!("{}: {}", field, e)))
        };
        let salt = decode("salt", &sealed.salt)?;
        let nonce_bytes = decode("nonce", &sealed.nonce)?;
        let ciphertext = decode("ciphertext", &sealed.ciphertext)?;
        if nonce_bytes.len() != 12 {
            return Err(KeystoreError::Corrupt("nonce must be 12 bytes".to_string()));
        }

        let key = Self::derive_key(passphrase, &salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| KeystoreError::Corrupt(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| KeystoreError::InvalidPassword)?;

        let material: ShareMaterial = serde_json::from_slice(&plaintext)?;
        let key_package = frost::keys::KeyPackage::deserialize(&material.key_package)
            .map_err(|e| KeystoreError::Frost(e.to_string()))?;
        let public_key_package =
            frost::keys::PublicKeyPackage::deserialize(&material.public_key_package)
                .map_err(|e| KeystoreError::Frost(e.to_string()))?;

        tracing::debug!(
            federation_id = %sealed.federation_id,
            signer_index = sealed.signer_index,
            "Unsealed guardian key share"
        );

        Ok(UnsealedShare {
            federation_id: sealed.federation_id,
            participant_id: sealed.participant_id,
            signer_index: sealed.signer_index,
            key_package,
            public_key_package,
        })
    }

    /// Group key from the file metadata, no passphrase needed
    pub fn group_public_key(&self) -> Result<String, KeystoreError> {
        Ok(self.read_sealed()?.group_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn dealer_share() -> (frost::keys::KeyPackage, frost::keys::PublicKeyPackage) {
        let (shares, pubkeys) = frost::keys::generate_with_dealer(
            3,
            2,
            frost::keys::IdentifierList::Default,
            &mut OsRng,
        )
        .unwrap();
        let identifier = frost::Identifier::try_from(1u16).unwrap();
        let key_package =
            frost::keys::KeyPackage::try_from(shares.get(&identifier).unwrap().clone()).unwrap();
        (key_package, pubkeys)
    }

    #[test]
    fn test_key_derivation_depends_on_salt() {
        let a = Keystore::derive_key("hunter2", b"salt-a");
        assert_eq!(a, Keystore::derive_key("hunter2", b"salt-a"));
        assert_ne!(a, Keystore::derive_key("hunter2", b"salt-b"));
        assert_ne!(a, Keystore::derive_key("hunter3", b"salt-a"));
    }

    #[test]
    fn test_seal_unseal() {
        let dir = tempfile::tempdir().unwrap();
        let (key_package, pubkeys) = dealer_share();
        let keystore = Keystore::new(dir.path().join("alice.key.enc"), "alice");
        keystore
            .seal("smith-family", 1, &key_package, &pubkeys, "correct horse")
            .unwrap();

        let share = keystore.unseal("correct horse").unwrap();
        assert_eq!(share.federation_id, "smith-family");
        assert_eq!(share.signer_index, 1);
        assert_eq!(
            share.key_package.verifying_share().serialize().unwrap(),
            key_package.verifying_share().serialize().unwrap()
        );
        assert_eq!(keystore.group_public_key().unwrap().len(), 64);

        // Metadata is public, the share is not
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(keystore.path()).unwrap()).unwrap();
        assert_eq!(raw["participant_id"], "alice");
        assert!(raw.get("key_package").is_none());
    }

    #[test]
    fn test_wrong_passphrase_and_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.key.enc");
        let (key_package, pubkeys) = dealer_share();
        Keystore::new(&path, "alice")
            .seal("fam", 1, &key_package, &pubkeys, "right")
            .unwrap();

        assert!(matches!(
            Keystore::new(&path, "alice").unseal("wrong"),
            Err(KeystoreError::InvalidPassword)
        ));
        assert!(matches!(
            Keystore::new(&path, "bob").unseal("right"),
            Err(KeystoreError::OwnerMismatch { .. })
        ));
        assert!(matches!(
            Keystore::new(dir.path().join("missing"), "alice").unseal("right"),
            Err(KeystoreError::KeyNotFound(_))
        ));
    }
}
