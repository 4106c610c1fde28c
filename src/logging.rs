//! Structured Logging for the signing engine
//!
//! JSON events for log aggregation, correlation ids per session, and a
//! dedicated `federation::security` target for nonce reuse and MFA failures.
//!
//! ```rust,ignore
//! use federation_frost::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "federation::session", session_id = %id, "Session created");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Session lifecycle transitions
    Session,
    /// Nonce commitments and signature shares
    Contribution,
    /// Approval votes
    Approval,
    /// Physical MFA checks
    Mfa,
    /// Artifact publication and notifications
    Publish,
    /// Nonce reuse, MFA failures
    Security,
    /// Startup, shutdown, sweeps
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Session id, or a generated id for requests without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": {:?}}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Category helpers
// ============================================================================

/// Log a security-relevant event on `federation::security`
pub fn log_security_event(
    event_type: &str,
    success: bool,
    details: serde_json::Value,
    correlation_id: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Security, event_type).with_data(
        serde_json::json!({
            "success": success,
            "details": details
        }),
    );
    if let Some(id) = correlation_id {
        event = event.with_correlation_id(id);
    }

    if success {
        tracing::info!(target: "federation::security", "{}", event.to_json());
    } else {
        tracing::warn!(target: "federation::security", "{}", event.to_json());
    }
}

/// Log a session transition
pub fn log_session_event(event_type: &str, session_id: &str, data: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Session, event_type)
        .with_correlation_id(session_id)
        .with_data(data);
    tracing::info!(target: "federation::session", "{}", event.to_json());
}

/// Log an accepted or rejected contribution
pub fn log_contribution_event(
    event_type: &str,
    session_id: &str,
    role: Option<&str>,
    error: Option<(&str, &str)>,
) {
    let level = if error.is_some() {
        LogLevel::Warn
    } else {
        LogLevel::Debug
    };
    let mut event = LogEvent::new(level, EventCategory::Contribution, event_type)
        .with_correlation_id(session_id)
        .with_data(serde_json::json!({ "role": role }));
    if let Some((code, message)) = error {
        event = event.with_error(code, message);
        tracing::warn!(target: "federation::session", "{}", event.to_json());
    } else {
        tracing::debug!(target: "federation::session", "{}", event.to_json());
    }
}

/// Log a recorded vote
pub fn log_approval_event(session_id: &str, role: &str, approved: bool, quorum: &str) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Approval, "vote_recorded")
        .with_correlation_id(session_id)
        .with_data(serde_json::json!({
            "role": role,
            "approved": approved,
            "quorum": quorum
        }));
    tracing::info!(target: "federation::approval", "{}", event.to_json());
}

/// Log an MFA pass summary
pub fn log_mfa_event(session_id: &str, requirement: &str, verified: usize, failed: usize) {
    let level = if failed > 0 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };
    let event = LogEvent::new(level, EventCategory::Mfa, "mfa_pass")
        .with_correlation_id(session_id)
        .with_data(serde_json::json!({
            "requirement": requirement,
            "verified": verified,
            "failed": failed
        }));
    match level {
        LogLevel::Warn => tracing::warn!(target: "federation::mfa", "{}", event.to_json()),
        _ => tracing::info!(target: "federation::mfa", "{}", event.to_json()),
    }
}

/// Log a publish or notification outcome
pub fn log_publish_event(
    event_type: &str,
    session_id: &str,
    artifact_id: Option<&str>,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Publish, event_type)
        .with_correlation_id(session_id)
        .with_data(serde_json::json!({
            "artifact_id": artifact_id,
            "success": success
        }));
    if let Some(err) = error {
        event = event.with_error("PUBLISH_ERROR", err);
    }

    if success {
        tracing::info!(target: "federation::publish", "{}", event.to_json());
    } else {
        tracing::error!(target: "federation::publish", "{}", event.to_json());
    }
}

/// Log a system event (startup, sweep results)
pub fn log_system_event(event_type: &str, data: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::System, event_type)
        .with_correlation_id(generate_correlation_id())
        .with_data(data);
    tracing::info!(target: "federation::system", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_filter();
        EnvFilter::new(format!(
            "federation={level},federation_frost={level},tower_http={level},axum={level}"
        ))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from the engine configuration
pub fn init_from_config(config: &crate::config::EngineConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Unique correlation id for events not tied to a session
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Warn, EventCategory::Security, "nonce_reuse")
            .with_correlation_id("session-123")
            .with_data(serde_json::json!({"commitment_fp": "00ff"}))
            .with_error("NONCE_REUSE", "commitment seen before");

        let json = event.to_json();
        assert!(json.contains("\"category\":\"security\""));
        assert!(json.contains("session-123"));
        assert!(json.contains("NONCE_REUSE"));
        assert!(json.contains("\"level\":\"WARN\""));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(generate_correlation_id(), generate_correlation_id());
    }
}
