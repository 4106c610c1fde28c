//! Federation signing coordinator CLI
//!
//! Runs the coordinator service, generates development keys, and drives a
//! guardian through a signing session.

use clap::{Parser, Subcommand};
use federation_frost::{
    clock::SystemClock,
    config::EngineConfig,
    coordinator::{CoordinatorSettings, SigningCoordinator},
    federation::{save_directory, DirectoryFile, FederationRecord, FederationRole, RosterMember, StaticDirectory},
    keystore::Keystore,
    logging,
    participant::{CoordinatorClient, GuardianSigner},
    policy::FederationPolicy,
    publisher::{
        ArtifactPublisher, NotificationTransport, RecordingNotifier, RecordingPublisher,
        WebhookNotifier, WebhookPublisher,
    },
    server::{create_router, AppState},
    session::{PaymentIntent, SessionStatus, SigningPayload},
    storage::SqliteStore,
    nostr::EventTemplate,
    types::CreateSessionRequest,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "federation-frost")]
#[command(about = "Threshold signing coordinator for family federations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator service (configured through FEDERATION_* variables)
    Serve {
        /// Bind address, overrides FEDERATION_BIND
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate dealer keys and a directory file (for development only)
    GenerateTestKeys {
        #[arg(short, long, default_value = "smith-family")]
        federation: String,

        /// Comma-separated participant ids; the first becomes the steward
        #[arg(long, default_value = "alice,bob,carol")]
        members: String,

        /// Threshold (t of n)
        #[arg(short, long, default_value = "2")]
        threshold: u16,

        #[arg(short, long, default_value = "config")]
        output_dir: String,

        /// Passphrase for every generated key file
        #[arg(short, long, env = "FEDERATION_KEY_PASSWORD")]
        password: String,
    },

    /// Ask the federation to sign a Nostr note or a payment
    Request {
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,

        #[arg(short, long)]
        federation: String,

        #[arg(short, long)]
        requester: String,

        /// Note content (kind 1)
        #[arg(long, conflicts_with_all = ["amount", "destination"])]
        note: Option<String>,

        /// Payment amount in sats
        #[arg(long, requires = "destination")]
        amount: Option<u64>,

        #[arg(long)]
        destination: Option<String>,
    },

    /// Take part in a session as a guardian
    Participate {
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,

        #[arg(long)]
        session: String,

        #[arg(short = 'i', long)]
        participant: String,

        #[arg(short, long)]
        key_file: String,

        #[arg(short, long, env = "FEDERATION_KEY_PASSWORD")]
        password: String,

        /// Cast an approval vote before signing
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Cast a rejection vote and do not sign
        #[arg(long)]
        reject: bool,

        /// Seconds to wait for the signature round to open
        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = EngineConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            logging::init_from_config(&config)?;
            run_server(config).await?;
        }
        Commands::GenerateTestKeys {
            federation,
            members,
            threshold,
            output_dir,
            password,
        } => {
            logging::init_logging(logging::LogLevel::Info, false)?;
            generate_test_keys(&federation, &members, threshold, &output_dir, &password)?;
        }
        Commands::Request {
            server,
            federation,
            requester,
            note,
            amount,
            destination,
        } => {
            logging::init_logging(logging::LogLevel::Info, false)?;
            let payload = match (note, amount, destination) {
                (Some(content), None, None) => SigningPayload::NostrEvent(EventTemplate {
                    created_at: chrono::Utc::now().timestamp().max(0) as u64,
                    kind: 1,
                    tags: vec![],
                    content,
                }),
                (None, Some(amount), Some(destination)) => SigningPayload::Payment(PaymentIntent {
                    amount,
                    destination,
                    memo: None,
                }),
                _ => return Err("pass either --note or --amount with --destination".into()),
            };
            let created = CoordinatorClient::new(&server)
                .create_session(&CreateSessionRequest {
                    federation_id: federation,
                    requester_id: requester,
                    payload,
                    threshold: None,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Commands::Participate {
            server,
            session,
            participant,
            key_file,
            password,
            approve,
            reject,
            timeout_secs,
        } => {
            logging::init_logging(logging::LogLevel::Info, false)?;
            let share = Keystore::new(&key_file, participant.as_str()).unseal(&password)?;
            let signer = GuardianSigner::new(share);
            participate(
                &CoordinatorClient::new(&server),
                &signer,
                &session,
                vote_choice(approve, reject),
                Duration::from_secs(timeout_secs),
            )
            .await?;
        }
    }

    Ok(())
}

fn vote_choice(approve: bool, reject: bool) -> Option<bool> {
    match (approve, reject) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Run the coordinator service
async fn run_server(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.print_summary();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::new(&config.db_path)?);
    let directory = Arc::new(StaticDirectory::load(&config.directory_file)?);

    let publisher: Arc<dyn ArtifactPublisher> = match &config.relay_url {
        Some(url) => Arc::new(WebhookPublisher::new(url)),
        None => {
            tracing::warn!("No relay configured; artifacts are only recorded in memory");
            Arc::new(RecordingPublisher::new())
        }
    };
    let notifier: Arc<dyn NotificationTransport> = match &config.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(RecordingNotifier::new()),
    };

    let coordinator = SigningCoordinator::new(
        store,
        directory,
        publisher,
        notifier,
        Arc::new(SystemClock),
        CoordinatorSettings::from(&config),
    );
    let state = Arc::new(AppState::new(coordinator));

    let sweeper = Arc::clone(&state);
    let sweep_every = Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.coordinator.expire_stale_sessions().await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    });

    let addr: SocketAddr = config.bind.parse()?;
    logging::log_system_event(
        "startup",
        serde_json::json!({ "bind": addr.to_string(), "version": env!("CARGO_PKG_VERSION") }),
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            logging::log_system_event("shutdown", serde_json::json!({}));
        })
        .await?;

    Ok(())
}

/// Dealer keygen: one sealed key file per member plus a directory entry
fn generate_test_keys(
    federation_id: &str,
    members: &str,
    threshold: u16,
    output_dir: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use frost_secp256k1_tr as frost;
    use rand::rngs::OsRng;

    tracing::warn!("Generating test keys with trusted dealer - FOR DEVELOPMENT ONLY!");

    let names: Vec<&str> = members
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let total = names.len() as u16;
    if !(2..=7).contains(&total) || threshold < 2 || threshold > total {
        return Err(format!("need 2 <= t ({}) <= n ({}) <= 7", threshold, total).into());
    }

    let (shares, pubkey_package) = frost::keys::generate_with_dealer(
        total,
        threshold,
        frost::keys::IdentifierList::Default,
        &mut OsRng,
    )?;
    std::fs::create_dir_all(output_dir)?;

    let mut roster = Vec::new();
    for (idx, name) in names.iter().enumerate() {
        let signer_index = (idx + 1) as u16;
        let identifier = frost::Identifier::try_from(signer_index)?;
        let secret_share = shares
            .get(&identifier)
            .ok_or_else(|| format!("dealer produced no share for index {}", signer_index))?;
        let key_package = frost::keys::KeyPackage::try_from(secret_share.clone())?;

        let key_path = format!("{}/{}.key.enc", output_dir, name);
        Keystore::new(&key_path, *name).seal(
            federation_id,
            signer_index,
            &key_package,
            &pubkey_package,
            password,
        )?;
        tracing::info!("Sealed key share for {} at {}", name, key_path);

        roster.push(RosterMember {
            participant_id: name.to_string(),
            role: if idx == 0 {
                FederationRole::Steward
            } else {
                FederationRole::Guardian
            },
            signer_index: Some(signer_index),
            mfa_device: None,
        });
    }

    let record = FederationRecord {
        federation_id: federation_id.to_string(),
        name: federation_id.to_string(),
        public_key_package: hex::encode(pubkey_package.serialize()?),
        key_threshold: threshold,
        policy: FederationPolicy::default(),
        roster,
    };
    record.validate()?;
    let group_key = hex::encode(record.group_public_key()?);

    let directory_path = format!("{}/directory.toml", output_dir);
    save_directory(
        &directory_path,
        &DirectoryFile {
            federations: vec![record],
        },
    )?;

    tracing::info!("Group public key (x-only): {}", group_key);
    tracing::info!("Wrote directory to {}", directory_path);
    Ok(())
}

/// Drive one guardian through both rounds
async fn participate(
    client: &CoordinatorClient,
    signer: &GuardianSigner,
    session_id: &str,
    vote: Option<bool>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(approved) = vote {
        let tally = client
            .vote(session_id, signer.participant_id(), approved, None)
            .await?;
        tracing::info!(
            approvals = tally.approvals,
            rejections = tally.rejections,
            required = tally.required,
            "Vote recorded"
        );
        if !approved {
            return Ok(());
        }
    }

    let receipt = client
        .submit_nonce(session_id, &signer.commit(session_id)?)
        .await?;
    tracing::info!(
        collected = receipt.collected,
        threshold = receipt.threshold,
        "Nonce commitment accepted"
    );

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = client.session(session_id).await?;
        match view.status {
            SessionStatus::CollectingSignatures => break,
            SessionStatus::CollectingNonces if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            status => {
                signer.abandon(session_id)?;
                return Err(format!("session is {}, not signing", status).into());
            }
        }
    }

    let package = client.signing_package(session_id).await?;
    if !package.commitments.contains_key(&signer.signer_index()) {
        signer.abandon(session_id)?;
        tracing::info!("Not part of the signing set; nothing to sign");
        return Ok(());
    }

    let receipt = client
        .submit_share(session_id, &signer.sign(&package)?)
        .await?;
    tracing::info!(
        status = %receipt.status,
        collected = receipt.collected,
        threshold = receipt.threshold,
        "Signature share accepted"
    );
    Ok(())
}
