//! Artifact publication and participant notification
//!
//! A completed session yields exactly one artifact: a signed Nostr event or a
//! signed payment authorization. Delivery goes through [`ArtifactPublisher`];
//! the outcome is fanned out to every roster member through
//! [`NotificationTransport`].

use crate::nostr::SignedEvent;
use crate::session::PaymentIntent;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rejected by endpoint: {0}")]
    Rejected(String),
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Payment the federation has signed off on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub session_id: String,
    pub federation_id: String,
    /// x-only group key (hex)
    pub group_public_key: String,
    pub intent: PaymentIntent,
    pub message_hash: String,
    pub signature: String,
}

/// Output of a completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignedArtifact {
    NostrEvent { event: SignedEvent },
    PaymentAuthorization(PaymentAuthorization),
}

impl SignedArtifact {
    /// Stable id: the event id, or the signed message hash for payments
    pub fn artifact_id(&self) -> &str {
        match self {
            SignedArtifact::NostrEvent { event } => &event.id,
            SignedArtifact::PaymentAuthorization(auth) => &auth.message_hash,
        }
    }
}

/// Session outcome sent to participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Published,
    Failed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub session_id: String,
    pub federation_id: String,
    pub outcome: NotificationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Deliver the artifact; returns the id under which it was accepted
    async fn publish(&self, artifact: &SignedArtifact) -> Result<String, PublishError>;
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), PublishError>;
}

/// Posts artifacts to an HTTP relay bridge
///
/// Nostr events are sent as NIP-01 `["EVENT", <event>]` frames; payment
/// authorizations as their JSON body.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactPublisher for WebhookPublisher {
    async fn publish(&self, artifact: &SignedArtifact) -> Result<String, PublishError> {
        let body = match artifact {
            SignedArtifact::NostrEvent { event } => serde_json::json!(["EVENT", event]),
            SignedArtifact::PaymentAuthorization(auth) => serde_json::json!(auth),
        };

        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(format!("{}: {}", status, text)));
        }
        Ok(artifact.artifact_id().to_string())
    }
}

/// Posts notifications as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NotificationTransport for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), PublishError> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PublishError::Rejected(resp.status().to_string()));
        }
        Ok(())
    }
}

/// Keeps published artifacts in memory; used in development and tests
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<SignedArtifact>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<SignedArtifact> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactPublisher for RecordingPublisher {
    async fn publish(&self, artifact: &SignedArtifact) -> Result<String, PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("relay offline".to_string()));
        }
        self.published.lock().await.push(artifact.clone());
        Ok(artifact.artifact_id().to_string())
    }
}

/// Keeps notifications in memory; recipients can be marked unreachable
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_unreachable(&self, recipient: &str) {
        self.unreachable.lock().await.insert(recipient.to_string());
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), PublishError> {
        if self
            .unreachable
            .lock()
            .await
            .contains(&notification.recipient)
        {
            return Err(PublishError::Unavailable(notification.recipient.clone()));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
