//! Several coordinator instances sharing one SQLite file

mod common;

use common::{dealer_federation, note, START};
use federation_frost::clock::ManualClock;
use federation_frost::coordinator::{CoordinatorSettings, SigningCoordinator};
use federation_frost::audit::AuditEvent;
use federation_frost::federation::StaticDirectory;
use federation_frost::error::EngineError;
use federation_frost::policy::FederationPolicy;
use federation_frost::publisher::{RecordingNotifier, RecordingPublisher};
use federation_frost::session::{PartialSignature, SessionStatus};
use federation_frost::storage::{ContributionLedger, SessionStore, SqliteStore};
use federation_frost::types::{AggregateOutcome, CreateSessionRequest};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Cluster {
    nodes: Vec<Arc<SigningCoordinator>>,
    store: Arc<SqliteStore>,
    guardians: BTreeMap<String, federation_frost::participant::GuardianSigner>,
    _dir: tempfile::TempDir,
}

fn cluster(names: &[&str], threshold: u16, nodes: usize) -> Cluster {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("federation.db");
    let (record, guardians) = dealer_federation(
        "fam",
        names,
        threshold,
        FederationPolicy::default(),
        &BTreeMap::new(),
    );
    let directory = Arc::new(StaticDirectory::from_records([record]).unwrap());
    let clock = Arc::new(ManualClock::new(START));

    let nodes = (0..nodes)
        .map(|_| {
            Arc::new(SigningCoordinator::new(
                Arc::new(SqliteStore::new(&db).unwrap()),
                directory.clone(),
                Arc::new(RecordingPublisher::new()),
                Arc::new(RecordingNotifier::new()),
                clock.clone(),
                CoordinatorSettings::default(),
            ))
        })
        .collect();

    Cluster {
        nodes,
        store: Arc::new(SqliteStore::new(&db).unwrap()),
        guardians,
        _dir: dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_nonces_close_round_at_threshold() {
    let c = cluster(&["alice", "bob", "carol", "dave", "erin"], 3, 3);
    let session = c.nodes[0]
        .create_session(CreateSessionRequest {
            federation_id: "fam".into(),
            requester_id: "alice".into(),
            payload: note("race"),
            threshold: None,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for (i, (name, guardian)) in c.guardians.iter().enumerate() {
        let node = c.nodes[i % c.nodes.len()].clone();
        let submission = guardian.commit(&session.id).unwrap();
        let session_id = session.id.clone();
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            node.submit_nonce_commitment(&session_id, &name, &submission.commitment)
                .await
        }));
    }

    let mut accepted = 0;
    let mut closed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            // A slow loser may only see the session after round 2 opened
            Err(EngineError::RoundClosed(_)) | Err(EngineError::InvalidState { .. }) => {
                closed += 1
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(closed, 2);

    let stored = c.store.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::CollectingSignatures);
    assert_eq!(c.store.nonces_for_session(&session.id).await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_aggregation_winner() {
    let c = cluster(&["alice", "bob", "carol"], 2, 3);
    let node = &c.nodes[0];
    let session = node
        .create_session(CreateSessionRequest {
            federation_id: "fam".into(),
            requester_id: "bob".into(),
            payload: note("one signature only"),
            threshold: None,
        })
        .await
        .unwrap();

    for name in ["alice", "bob"] {
        let submission = c.guardians[name].commit(&session.id).unwrap();
        node.submit_nonce_commitment(&session.id, name, &submission.commitment)
            .await
            .unwrap();
    }
    let package = node.signing_package(&session.id).await.unwrap();

    let alice = c.guardians["alice"].sign(&package).unwrap();
    node.submit_partial_signature(&session.id, "alice", &alice.share)
        .await
        .unwrap();

    // Record bob's share below the coordinator so nobody has aggregated yet
    let bob = c.guardians["bob"].sign(&package).unwrap();
    c.store
        .record_partial_signature(&PartialSignature {
            session_id: session.id.clone(),
            participant_id: "bob".into(),
            signer_index: 2,
            share: bob.share,
            submitted_at: START,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..12 {
        let node = c.nodes[i % c.nodes.len()].clone();
        let session_id = session.id.clone();
        handles.push(tokio::spawn(async move {
            node.aggregate_signatures(&session_id).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AggregateOutcome::Completed { .. } => winners += 1,
            AggregateOutcome::AlreadyCompleted { .. } | AggregateOutcome::InProgress => {}
            AggregateOutcome::AwaitingShares { .. } => panic!("both shares are recorded"),
        }
    }
    assert_eq!(winners, 1);

    let stored = c.store.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(node.verify_aggregated_signature(&session.id).await.unwrap());

    let completions = node
        .audit_trail(&session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event == AuditEvent::StateTransition && e.reason_code == "completed")
        .count();
    assert_eq!(completions, 1);
}
