//! Environment-based Configuration for the signing engine
//!
//! # Environment Variables
//!
//! - `FEDERATION_BIND` - HTTP listen address (default: "0.0.0.0:8080")
//! - `FEDERATION_DB_PATH` - SQLite database file (default: "data/federation.db")
//! - `FEDERATION_DIRECTORY_FILE` - Federation directory TOML (default: "config/directory.toml")
//! - `FEDERATION_SESSION_LIFETIME_SECS` - Session deadline (default: 600)
//! - `FEDERATION_MFA_TOLERANCE_SECS` - Card tap timestamp tolerance (default: 300)
//! - `FEDERATION_SWEEP_INTERVAL_SECS` - Expiry sweep period (default: 30)
//! - `FEDERATION_RELAY_URL` - Endpoint receiving signed artifacts
//! - `FEDERATION_NOTIFY_URL` - Endpoint receiving participant notifications
//! - `FEDERATION_LOG_LEVEL` - debug, info, warn, error (default: info)
//! - `FEDERATION_LOG_JSON` - "1" for JSON log output

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_SESSION_LIFETIME_SECS: u64 = 600;
pub const DEFAULT_MFA_TOLERANCE_SECS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind: String,
    pub db_path: PathBuf,
    pub directory_file: PathBuf,
    pub session_lifetime_secs: u64,
    pub mfa_tolerance_secs: u64,
    pub sweep_interval_secs: u64,
    pub relay_url: Option<String>,
    pub notify_url: Option<String>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: PathBuf::from("data/federation.db"),
            directory_file: PathBuf::from("config/directory.toml"),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            mfa_tolerance_secs: DEFAULT_MFA_TOLERANCE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            relay_url: None,
            notify_url: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            bind: non_empty("FEDERATION_BIND").unwrap_or(defaults.bind),
            db_path: non_empty("FEDERATION_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            directory_file: non_empty("FEDERATION_DIRECTORY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.directory_file),
            session_lifetime_secs: parse_secs(
                "FEDERATION_SESSION_LIFETIME_SECS",
                non_empty("FEDERATION_SESSION_LIFETIME_SECS"),
                defaults.session_lifetime_secs,
            )?,
            mfa_tolerance_secs: parse_secs(
                "FEDERATION_MFA_TOLERANCE_SECS",
                non_empty("FEDERATION_MFA_TOLERANCE_SECS"),
                defaults.mfa_tolerance_secs,
            )?,
            sweep_interval_secs: parse_secs(
                "FEDERATION_SWEEP_INTERVAL_SECS",
                non_empty("FEDERATION_SWEEP_INTERVAL_SECS"),
                defaults.sweep_interval_secs,
            )?,
            relay_url: non_empty("FEDERATION_RELAY_URL"),
            notify_url: non_empty("FEDERATION_NOTIFY_URL"),
            log_level: non_empty("FEDERATION_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: non_empty("FEDERATION_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_lifetime_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FEDERATION_SESSION_LIFETIME_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FEDERATION_SWEEP_INTERVAL_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }
        for (name, url) in [
            ("FEDERATION_RELAY_URL", &self.relay_url),
            ("FEDERATION_NOTIFY_URL", &self.notify_url),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue(
                        name.to_string(),
                        format!("not an http(s) URL: {}", url),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== Federation Signing Engine ===");
        println!("Bind: {}", self.bind);
        println!("Database: {}", self.db_path.display());
        println!("Directory: {}", self.directory_file.display());
        println!("Session lifetime: {}s", self.session_lifetime_secs);
        println!("MFA tolerance: {}s", self.mfa_tolerance_secs);
        println!("Sweep interval: {}s", self.sweep_interval_secs);
        println!(
            "Relay: {}",
            self.relay_url.as_deref().unwrap_or("(recording only)")
        );
        println!(
            "Notifications: {}",
            self.notify_url.as_deref().unwrap_or("(recording only)")
        );
        println!("Log Level: {}", self.log_level);
        println!("=================================");
    }
}

fn parse_secs(name: &str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("not a number: {}", raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.session_lifetime_secs, 600);
        assert_eq!(config.mfa_tolerance_secs, 300);
        assert!(config.relay_url.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FEDERATION_SESSION_LIFETIME_SECS", "120"),
            ("FEDERATION_RELAY_URL", "https://relay.example/publish"),
            ("FEDERATION_LOG_JSON", "1"),
            ("FEDERATION_NOTIFY_URL", ""),
        ]))
        .unwrap();
        assert_eq!(config.session_lifetime_secs, 120);
        assert_eq!(config.relay_url.as_deref(), Some("https://relay.example/publish"));
        assert!(config.notify_url.is_none());
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("FEDERATION_MFA_TOLERANCE_SECS", "five")])),
            Err(ConfigError::InvalidValue(..))
        ));
        assert!(EngineConfig::from_lookup(lookup(&[("FEDERATION_SESSION_LIFETIME_SECS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("FEDERATION_RELAY_URL", "ws://relay")])).is_err());
    }
}
