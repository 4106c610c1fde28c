//! Axum HTTP server for the signing coordinator
//!
//! Thin handlers over [`SigningCoordinator`]; every error leaves as an
//! [`ErrorResponse`] carrying the stable error code.

use crate::approval::QuorumTally;
use crate::audit::AuditEntry;
use crate::coordinator::SigningCoordinator;
use crate::error::EngineError;
use crate::session::SigningSession;
use crate::types::{
    AggregateOutcome, ContributionReceipt, CreateSessionRequest, ErrorResponse, FinalizeResponse,
    HealthResponse, NonceSubmission, SessionView, ShareSubmission, SigningPackageResponse,
    VerifyResponse, VoteRequest,
};
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
pub struct AppState {
    pub coordinator: SigningCoordinator,
    /// Origins allowed by CORS; empty allows none
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(coordinator: SigningCoordinator) -> Self {
        Self {
            coordinator,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Session summary returned on creation
#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub status: crate::session::SessionStatus,
    pub message_hash: String,
    pub threshold: u16,
    pub participant_count: u16,
    pub expires_at: u64,
}

impl From<SigningSession> for CreatedSession {
    fn from(session: SigningSession) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            message_hash: session.message_hash,
            threshold: session.threshold,
            participant_count: session.participant_count,
            expires_at: session.expires_at,
        }
    }
}

/// Create the router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        // Sessions
        .route("/sessions", post(create_session_handler))
        .route("/sessions/{id}", get(session_handler))
        .route("/sessions/{id}/signing-package", get(signing_package_handler))
        .route("/sessions/{id}/audit", get(audit_handler))
        // Signing rounds
        .route("/sessions/{id}/nonces", post(nonce_handler))
        .route("/sessions/{id}/signatures", post(share_handler))
        .route("/sessions/{id}/aggregate", post(aggregate_handler))
        .route("/sessions/{id}/verify", get(verify_handler))
        // Approval and release
        .route("/sessions/{id}/votes", post(vote_handler))
        .route("/sessions/{id}/finalize", post(finalize_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreatedSession>), ApiError> {
    let session = state
        .coordinator
        .create_session(request)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

async fn session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionView> {
    state
        .coordinator
        .session_status(&id)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn signing_package_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SigningPackageResponse> {
    state
        .coordinator
        .signing_package(&id)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn nonce_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<NonceSubmission>,
) -> ApiResult<ContributionReceipt> {
    state
        .coordinator
        .submit_nonce_commitment(&id, &request.participant_id, &request.commitment)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn share_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ShareSubmission>,
) -> ApiResult<ContributionReceipt> {
    state
        .coordinator
        .submit_partial_signature(&id, &request.participant_id, &request.share)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn aggregate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AggregateOutcome> {
    state
        .coordinator
        .aggregate_signatures(&id)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<VerifyResponse> {
    let valid = state
        .coordinator
        .verify_aggregated_signature(&id)
        .await
        .map_err(engine_error)?;
    Ok(Json(VerifyResponse {
        session_id: id,
        valid,
    }))
}

async fn vote_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<QuorumTally> {
    state
        .coordinator
        .record_vote(&id, request)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn finalize_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<FinalizeResponse> {
    state
        .coordinator
        .finalize_session(&id)
        .await
        .map(Json)
        .map_err(engine_error)
}

async fn audit_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AuditEntry>> {
    state
        .coordinator
        .audit_trail(&id)
        .await
        .map(Json)
        .map_err(engine_error)
}

/// Convert an engine error to an HTTP response
fn engine_error(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::SessionNotFound(_) | EngineError::FederationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::UnknownParticipant(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidThreshold { .. } | EngineError::InvalidInput(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::DuplicateContribution { .. }
        | EngineError::NonceReuse
        | EngineError::RoundClosed(_)
        | EngineError::InvalidState { .. } => StatusCode::CONFLICT,
        EngineError::MissingNonce { .. } => StatusCode::PRECONDITION_FAILED,
        EngineError::SessionExpired(_) => StatusCode::GONE,
        EngineError::MfaVerificationFailed(_) => StatusCode::UNAUTHORIZED,
        EngineError::QuorumNotMet(_) | EngineError::AggregationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::PublishFailed(_) => StatusCode::BAD_GATEWAY,
        EngineError::MalformedRecord(_) | EngineError::Storage(_) => {
            tracing::error!(error = %err, "Internal coordinator error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse::new(err.error_code(), err.public_message())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordinator::CoordinatorSettings;
    use crate::federation::test_support::dealer_federation;
    use crate::federation::StaticDirectory;
    use crate::policy::FederationPolicy;
    use crate::publisher::{RecordingNotifier, RecordingPublisher};
    use crate::storage::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_app() -> Router {
        let (record, _) =
            dealer_federation("fam", &["alice", "bob", "carol"], 2, FederationPolicy::default());
        let coordinator = SigningCoordinator::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(StaticDirectory::from_records([record]).unwrap()),
            Arc::new(RecordingPublisher::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(ManualClock::new(1_700_000_000)),
            CoordinatorSettings::default(),
        );
        create_router(Arc::new(AppState::new(coordinator)))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = create_test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_and_view_session() {
        let app = create_test_app();
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/sessions",
                serde_json::json!({
                    "federation_id": "fam",
                    "requester_id": "alice",
                    "payload": {"type": "nostr_event", "data": {
                        "created_at": 1_700_000_000, "kind": 1, "tags": [], "content": "gm"
                    }}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "collecting_nonces");
        let id = created["session_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view = body_json(response).await;
        assert_eq!(view["threshold"], 2);
        assert_eq!(view["nonces_collected"], 0);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sessions/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "SESSION_NOT_FOUND");

        let response = app
            .oneshot(json_request(
                "POST",
                "/sessions",
                serde_json::json!({
                    "federation_id": "fam",
                    "requester_id": "mallory",
                    "payload": {"type": "payment", "data": {"amount": 5, "destination": "x"}}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "UNKNOWN_PARTICIPANT");
        assert!(!body["message"].as_str().unwrap().contains("mallory"));
    }
}
