//! Signature aggregation and verification
//!
//! Shares are combined only through `frost::aggregate`, which checks every
//! share against its verifying share and identifies a cheating participant.
//! The group key always comes from the federation directory.

use crate::federation::FederationRecord;
use crate::session::{NonceCommitment, PartialSignature};
use frost_secp256k1_tr as frost;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregationError {
    /// Stored material could not be decoded
    #[error("malformed: {0}")]
    Malformed(String),

    /// FROST rejected the shares; `culprit` is the participant at fault, if known
    #[error("{message}")]
    Frost {
        message: String,
        culprit: Option<String>,
    },
}

fn malformed(e: impl ToString) -> AggregationError {
    AggregationError::Malformed(e.to_string())
}

/// Signing package plus the participant behind each FROST identifier
pub struct SigningSet {
    pub package: frost::SigningPackage,
    pub participants: BTreeMap<frost::Identifier, String>,
}

/// Decode a hex-encoded round-1 commitment
pub fn decode_commitment(hex_value: &str) -> Result<frost::round1::SigningCommitments, AggregationError> {
    let bytes = hex::decode(hex_value).map_err(malformed)?;
    frost::round1::SigningCommitments::deserialize(&bytes).map_err(malformed)
}

/// Re-encode a commitment in its one canonical hex form
///
/// `hex::decode` accepts either letter case, so the global nonce index is
/// keyed on this value rather than on what the caller sent.
pub fn canonical_commitment(hex_value: &str) -> Result<String, AggregationError> {
    let commitments = decode_commitment(hex_value)?;
    let bytes = commitments.serialize().map_err(malformed)?;
    Ok(hex::encode(bytes))
}

/// Decode a hex-encoded round-2 share
pub fn decode_share(hex_value: &str) -> Result<frost::round2::SignatureShare, AggregationError> {
    let bytes = hex::decode(hex_value).map_err(malformed)?;
    frost::round2::SignatureShare::deserialize(&bytes).map_err(malformed)
}

/// Build the signing package over the recorded commitments
pub fn signing_set(
    commitments: &[NonceCommitment],
    message_hash: &[u8; 32],
) -> Result<SigningSet, AggregationError> {
    let mut map = BTreeMap::new();
    let mut participants = BTreeMap::new();
    for nonce in commitments {
        let identifier =
            FederationRecord::frost_identifier(nonce.signer_index).map_err(malformed)?;
        map.insert(identifier, decode_commitment(&nonce.commitment)?);
        participants.insert(identifier, nonce.participant_id.clone());
    }

    Ok(SigningSet {
        package: frost::SigningPackage::new(map, message_hash),
        participants,
    })
}

/// Aggregate the shares of the signing set into a 64-byte signature
pub fn aggregate(
    federation: &FederationRecord,
    commitments: &[NonceCommitment],
    shares: &[PartialSignature],
    message_hash: &[u8; 32],
) -> Result<[u8; 64], AggregationError> {
    let set = signing_set(commitments, message_hash)?;
    let public_key_package = federation.public_key_package().map_err(malformed)?;

    let mut share_map = BTreeMap::new();
    for share in shares {
        let identifier =
            FederationRecord::frost_identifier(share.signer_index).map_err(malformed)?;
        share_map.insert(identifier, decode_share(&share.share)?);
    }

    let signature = frost::aggregate(&set.package, &share_map, &public_key_package).map_err(|e| {
        let culprit = e
            .culprit()
            .and_then(|id| set.participants.get(&id).cloned());
        AggregationError::Frost {
            message: e.to_string(),
            culprit,
        }
    })?;

    let sig_bytes = signature.serialize().map_err(malformed)?;
    sig_bytes.as_slice().try_into().map_err(|_| {
        AggregationError::Malformed(format!(
            "Invalid signature length: expected 64, got {}",
            sig_bytes.len()
        ))
    })
}

/// Verify a stored signature against the directory's group key
///
/// Undecodable hex or a wrong length is an error; a well-formed signature
/// that does not verify (including one that no longer parses as a curve
/// point after corruption) is `false`.
pub fn verify_signature(
    federation: &FederationRecord,
    message_hash: &[u8; 32],
    signature_hex: &str,
) -> Result<bool, AggregationError> {
    let bytes = hex::decode(signature_hex).map_err(malformed)?;
    if bytes.len() != 64 {
        return Err(AggregationError::Malformed(format!(
            "signature must be 64 bytes, got {}",
            bytes.len()
        )));
    }

    let public_key_package = federation.public_key_package().map_err(malformed)?;
    let signature = match frost::Signature::deserialize(&bytes) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };

    Ok(public_key_package
        .verifying_key()
        .verify(message_hash, &signature)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::test_support::dealer_federation;
    use crate::policy::FederationPolicy;
    use rand::rngs::OsRng;

    struct Round {
        commitments: Vec<NonceCommitment>,
        shares: Vec<PartialSignature>,
    }

    fn run_round(signers: &[&str], message: &[u8; 32]) -> (FederationRecord, Round) {
        let (record, packages) = dealer_federation(
            "fam",
            &["alice", "bob", "carol"],
            2,
            FederationPolicy::default(),
        );
        let mut rng = OsRng;

        let mut nonces = Vec::new();
        let mut commitments = Vec::new();
        for name in signers {
            let package = &packages[*name];
            let (n, c) = frost::round1::commit(package.signing_share(), &mut rng);
            let index = record.member(name).unwrap().signer_index.unwrap();
            commitments.push(NonceCommitment {
                session_id: "s1".into(),
                participant_id: name.to_string(),
                signer_index: index,
                commitment: hex::encode(c.serialize().unwrap()),
                submitted_at: 0,
            });
            nonces.push(n);
        }

        let set = signing_set(&commitments, message).unwrap();
        let shares = signers
            .iter()
            .zip(nonces.iter())
            .map(|(name, n)| {
                let share = frost::round2::sign(&set.package, n, &packages[*name]).unwrap();
                PartialSignature {
                    session_id: "s1".into(),
                    participant_id: name.to_string(),
                    signer_index: record.member(name).unwrap().signer_index.unwrap(),
                    share: hex::encode(share.serialize()),
                    submitted_at: 0,
                }
            })
            .collect();

        (
            record,
            Round {
                commitments,
                shares,
            },
        )
    }

    #[test]
    fn test_aggregate_then_verify() {
        let message = [42u8; 32];
        let (record, round) = run_round(&["alice", "carol"], &message);

        let signature = aggregate(&record, &round.commitments, &round.shares, &message).unwrap();
        let sig_hex = hex::encode(signature);
        assert!(verify_signature(&record, &message, &sig_hex).unwrap());
        assert!(!verify_signature(&record, &[43u8; 32], &sig_hex).unwrap());
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let message = [7u8; 32];
        let (record, round) = run_round(&["alice", "bob"], &message);
        let mut signature = aggregate(&record, &round.commitments, &round.shares, &message).unwrap();

        signature[40] ^= 0x01;
        assert!(!verify_signature(&record, &message, &hex::encode(signature)).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_error() {
        let (record, _) = run_round(&["alice", "bob"], &[1u8; 32]);
        assert!(verify_signature(&record, &[1u8; 32], "zz").is_err());
        assert!(verify_signature(&record, &[1u8; 32], &"00".repeat(63)).is_err());
    }

    #[test]
    fn test_bad_share_names_culprit() {
        let message = [9u8; 32];
        let (record, mut round) = run_round(&["alice", "bob"], &message);
        // bob's share computed for a different message
        let (_, other) = run_round(&["alice", "bob"], &[10u8; 32]);
        round.shares[1].share = other.shares[1].share.clone();

        match aggregate(&record, &round.commitments, &round.shares, &message) {
            Err(AggregationError::Frost { culprit, .. }) => {
                assert_eq!(culprit.as_deref(), Some("bob"));
            }
            other => panic!("expected culprit, got {:?}", other.map(hex::encode)),
        }
    }

    #[test]
    fn test_commitment_case_is_canonicalized() {
        let (_, round) = run_round(&["alice", "bob"], &[3u8; 32]);
        let lower = &round.commitments[0].commitment;

        assert_eq!(&canonical_commitment(lower).unwrap(), lower);
        assert_eq!(&canonical_commitment(&lower.to_uppercase()).unwrap(), lower);
        assert!(canonical_commitment("not hex").is_err());
    }
}
