//! Threshold Signing Coordinator for Family Federations
//!
//! A federation of 2-7 members, each holding an independent FROST key share,
//! jointly produces one BIP-340 Schnorr signature over secp256k1 for a Nostr
//! event or a payment authorization. The private key is never reconstructed:
//! guardians keep their shares locally and only send nonce commitments and
//! signature shares to the coordinator.
//!
//! # Architecture
//!
//! - Guardians run [`GuardianSigner`] against their encrypted [`Keystore`]
//! - [`SigningCoordinator`] drives each session through
//!   `collecting_nonces → collecting_signatures → aggregating → completed`
//! - Contributions live in a SQLite ledger with a global nonce index
//! - Optional physical MFA (P-256 card taps) and a guardian approval quorum
//!   gate the release of the signed artifact
//!
//! # Usage
//!
//! ## Start the coordinator
//! ```bash
//! federation-frost serve
//! ```
//!
//! ## Generate development keys and a directory file
//! ```bash
//! federation-frost generate-test-keys --federation smith-family \
//!     --members alice,bob,carol -t 2 --password <passphrase>
//! ```
//!
//! ## Take part in a session as a guardian
//! ```bash
//! federation-frost participate --server http://localhost:8080 \
//!     --session <id> --participant alice --key-file config/alice.key.enc
//! ```

pub mod aggregation;
pub mod approval;
pub mod audit;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod federation;
pub mod keystore;
pub mod logging;
pub mod mfa;
pub mod nostr;
pub mod participant;
pub mod policy;
pub mod publisher;
pub mod server;
pub mod session;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use coordinator::{CoordinatorSettings, SigningCoordinator};
pub use error::{EngineError, Result};
pub use federation::{FederationDirectory, FederationRecord, StaticDirectory};
pub use keystore::{Keystore, KeystoreError};
pub use participant::{GuardianError, GuardianSigner};
pub use policy::{ApprovalPolicy, ApprovalTiming, FederationPolicy, MfaPolicy, VetoPolicy};
pub use publisher::{ArtifactPublisher, NotificationTransport, SignedArtifact};
pub use server::{create_router, AppState};
pub use session::{SessionStatus, SigningPayload, SigningSession};
pub use storage::{SqliteStore, StorageError};
pub use types::*;
