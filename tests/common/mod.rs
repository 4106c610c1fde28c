//! Shared fixtures for coordinator integration tests
#![allow(dead_code)]

use federation_frost::clock::ManualClock;
use federation_frost::coordinator::{CoordinatorSettings, SigningCoordinator};
use federation_frost::federation::{
    FederationRecord, FederationRole, MfaDevice, RosterMember, StaticDirectory,
};
use federation_frost::keystore::UnsealedShare;
use federation_frost::mfa::{operation_hash, PhysicalMfaSignature};
use federation_frost::nostr::EventTemplate;
use federation_frost::participant::GuardianSigner;
use federation_frost::policy::FederationPolicy;
use federation_frost::publisher::{RecordingNotifier, RecordingPublisher};
use federation_frost::session::{PaymentIntent, SigningPayload, SigningSession};
use federation_frost::storage::{SessionStore, SqliteStore};
use federation_frost::types::{ContributionReceipt, CreateSessionRequest};
use frost_secp256k1_tr as frost;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const START: u64 = 1_700_000_000;

/// Simulated tap-to-sign card
pub struct Card {
    pub device_id: String,
    key: SigningKey,
}

impl Card {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn device(&self) -> MfaDevice {
        MfaDevice {
            device_id: self.device_id.clone(),
            public_key: hex::encode(self.key.verifying_key().to_sec1_bytes()),
        }
    }

    pub fn tap(&self, session: &SigningSession, timestamp: u64) -> PhysicalMfaSignature {
        let hash = operation_hash(&session.id, &session.payload, timestamp);
        let signature: Signature = self.key.sign(&hash);
        PhysicalMfaSignature {
            signature: hex::encode(signature.to_bytes()),
            public_key: hex::encode(self.key.verifying_key().to_sec1_bytes()),
            timestamp,
            device_id: self.device_id.clone(),
        }
    }
}

/// Dealer-keyed federation whose first member is the steward
pub fn dealer_federation(
    federation_id: &str,
    names: &[&str],
    key_threshold: u16,
    policy: FederationPolicy,
    cards: &BTreeMap<String, Card>,
) -> (FederationRecord, BTreeMap<String, GuardianSigner>) {
    let (shares, pubkey_package) = frost::keys::generate_with_dealer(
        names.len() as u16,
        key_threshold,
        frost::keys::IdentifierList::Default,
        &mut OsRng,
    )
    .unwrap();

    let mut roster = Vec::new();
    let mut guardians = BTreeMap::new();
    for (idx, name) in names.iter().enumerate() {
        let index = (idx + 1) as u16;
        let identifier = frost::Identifier::try_from(index).unwrap();
        let key_package =
            frost::keys::KeyPackage::try_from(shares.get(&identifier).unwrap().clone()).unwrap();
        guardians.insert(
            name.to_string(),
            GuardianSigner::new(UnsealedShare {
                federation_id: federation_id.to_string(),
                participant_id: name.to_string(),
                signer_index: index,
                key_package,
                public_key_package: pubkey_package.clone(),
            }),
        );
        roster.push(RosterMember {
            participant_id: name.to_string(),
            role: if idx == 0 {
                FederationRole::Steward
            } else {
                FederationRole::Guardian
            },
            signer_index: Some(index),
            mfa_device: cards.get(*name).map(Card::device),
        });
    }

    let record = FederationRecord {
        federation_id: federation_id.to_string(),
        name: federation_id.to_string(),
        public_key_package: hex::encode(pubkey_package.serialize().unwrap()),
        key_threshold,
        policy,
        roster,
    };
    (record, guardians)
}

pub struct Harness {
    pub coordinator: SigningCoordinator,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub publisher: Arc<RecordingPublisher>,
    pub notifier: Arc<RecordingNotifier>,
    pub directory: Arc<StaticDirectory>,
    pub record: FederationRecord,
    pub guardians: BTreeMap<String, GuardianSigner>,
    pub cards: BTreeMap<String, Card>,
}

impl Harness {
    pub fn new(names: &[&str], threshold: u16, policy: FederationPolicy) -> Self {
        Self::with_cards(names, threshold, policy, &[])
    }

    /// Members listed in `card_holders` get a registered card
    pub fn with_cards(
        names: &[&str],
        threshold: u16,
        policy: FederationPolicy,
        card_holders: &[&str],
    ) -> Self {
        let cards: BTreeMap<String, Card> = card_holders
            .iter()
            .map(|name| (name.to_string(), Card::new(&format!("card-{}", name))))
            .collect();
        let (record, guardians) = dealer_federation("fam", names, threshold, policy, &cards);

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let publisher = Arc::new(RecordingPublisher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let directory = Arc::new(StaticDirectory::from_records([record.clone()]).unwrap());

        let coordinator = SigningCoordinator::new(
            store.clone(),
            directory.clone(),
            publisher.clone(),
            notifier.clone(),
            clock.clone(),
            CoordinatorSettings::default(),
        );

        Self {
            coordinator,
            store,
            clock,
            publisher,
            notifier,
            directory,
            record,
            guardians,
            cards,
        }
    }

    pub async fn store_session(&self, id: &str) -> SigningSession {
        self.store.get_session(id).await.unwrap().unwrap()
    }

    pub fn guardian(&self, name: &str) -> &GuardianSigner {
        &self.guardians[name]
    }

    pub async fn open(&self, payload: SigningPayload) -> SigningSession {
        self.coordinator
            .create_session(CreateSessionRequest {
                federation_id: "fam".to_string(),
                requester_id: "alice".to_string(),
                payload,
                threshold: None,
            })
            .await
            .unwrap()
    }

    pub async fn commit(&self, session_id: &str, name: &str) -> ContributionReceipt {
        let submission = self.guardian(name).commit(session_id).unwrap();
        self.coordinator
            .submit_nonce_commitment(session_id, name, &submission.commitment)
            .await
            .unwrap()
    }

    pub async fn sign(&self, session_id: &str, name: &str) -> ContributionReceipt {
        let package = self.coordinator.signing_package(session_id).await.unwrap();
        let submission = self.guardian(name).sign(&package).unwrap();
        self.coordinator
            .submit_partial_signature(session_id, name, &submission.share)
            .await
            .unwrap()
    }

    /// Both rounds for the given signers
    pub async fn run_signing(&self, session_id: &str, signers: &[&str]) -> ContributionReceipt {
        for name in signers {
            self.commit(session_id, name).await;
        }
        let mut last = None;
        for name in signers {
            last = Some(self.sign(session_id, name).await);
        }
        last.unwrap()
    }
}

pub fn note(content: &str) -> SigningPayload {
    SigningPayload::NostrEvent(EventTemplate {
        created_at: START,
        kind: 1,
        tags: vec![vec!["t".to_string(), "family".to_string()]],
        content: content.to_string(),
    })
}

pub fn payment(amount: u64) -> SigningPayload {
    SigningPayload::Payment(PaymentIntent {
        amount,
        destination: "lnbc1family".to_string(),
        memo: Some("allowance".to_string()),
    })
}
