//! Storage Layer Module
//!
//! Persistence for sessions, contributions, votes, MFA claims and the audit
//! trail. Everything lives in one SQLite database so a single transaction can
//! cover the uniqueness checks of a contribution.

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    ApprovalStore, AuditLog, ContributionLedger, SessionStore, SigningStore, StorageError,
    StorageResult,
};
