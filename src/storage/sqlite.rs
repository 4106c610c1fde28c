//! SQLite Persistent Storage for the signing engine
//!
//! Durable storage for sessions and contributions that survives restarts.
//! Uses connection pooling via r2d2; contribution writes run in
//! `BEGIN IMMEDIATE` transactions so their read-check-insert sequence is
//! serialized across connections.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use super::traits::{
    ApprovalStore, AuditLog, ContributionLedger, SessionStore, StorageError, StorageResult,
};
use crate::approval::ApprovalVote;
use crate::audit::AuditEntry;
use crate::mfa::{MfaVerificationRecord, PhysicalMfaSignature};
use crate::session::{
    FailureReason, NonceCommitment, PartialSignature, SessionStatus, SigningPayload,
    SigningSession,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const NON_TERMINAL: &str = "('collecting_nonces', 'collecting_signatures', 'aggregating')";

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        return err.extended_code == 1555 || err.extended_code == 2067;
    }
    false
}

fn invalid(column: &str, e: impl ToString) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(StorageError::InvalidData(format!("{}: {}", column, e.to_string()))),
    )
}

/// SQLite-backed store with connection pooling
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
            c.busy_timeout(BUSY_TIMEOUT)?;
            c.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                federation_id TEXT NOT NULL,
                requester_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                message_hash TEXT NOT NULL,
                operation_amount INTEGER,
                threshold INTEGER NOT NULL,
                participant_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                signature TEXT,
                artifact_id TEXT,
                failure_reason TEXT,
                failure_detail TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);

            CREATE TABLE IF NOT EXISTS nonce_commitments (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                participant_id TEXT NOT NULL,
                signer_index INTEGER NOT NULL,
                commitment TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                UNIQUE (session_id, participant_id)
            );

            -- Global: a commitment may never appear twice, in any session
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nonce_commitment_value
                ON nonce_commitments(commitment);

            CREATE TABLE IF NOT EXISTS partial_signatures (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                participant_id TEXT NOT NULL,
                signer_index INTEGER NOT NULL,
                share TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                UNIQUE (session_id, participant_id)
            );

            CREATE TABLE IF NOT EXISTS approval_votes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                voter_id TEXT NOT NULL,
                approved INTEGER NOT NULL,
                mfa TEXT,
                reason TEXT,
                cast_at INTEGER NOT NULL,
                UNIQUE (session_id, voter_id)
            );

            CREATE TABLE IF NOT EXISTS mfa_verifications (
                operation_hash TEXT NOT NULL,
                device_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                verified_at INTEGER NOT NULL,
                PRIMARY KEY (operation_hash, device_id)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                event TEXT NOT NULL,
                severity TEXT NOT NULL,
                reason_code TEXT NOT NULL,
                actor_role TEXT,
                detail TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_log(session_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SigningSession> {
        let status: String = row.get("status")?;
        let status: SessionStatus = status.parse().map_err(|e| invalid("status", e))?;
        let payload: String = row.get("payload")?;
        let payload: SigningPayload =
            serde_json::from_str(&payload).map_err(|e| invalid("payload", e))?;
        let failure_reason = row
            .get::<_, Option<String>>("failure_reason")?
            .map(|s| s.parse::<FailureReason>())
            .transpose()
            .map_err(|e| invalid("failure_reason", e))?;

        Ok(SigningSession {
            id: row.get("id")?,
            federation_id: row.get("federation_id")?,
            requester_id: row.get("requester_id")?,
            status,
            payload,
            message_hash: row.get("message_hash")?,
            operation_amount: row
                .get::<_, Option<i64>>("operation_amount")?
                .map(|v| v as u64),
            threshold: row.get::<_, i64>("threshold")? as u16,
            participant_count: row.get::<_, i64>("participant_count")? as u16,
            created_at: row.get::<_, i64>("created_at")? as u64,
            expires_at: row.get::<_, i64>("expires_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
            version: row.get::<_, i64>("version")? as u64,
            signature: row.get("signature")?,
            artifact_id: row.get("artifact_id")?,
            failure_reason,
            failure_detail: row.get("failure_detail")?,
        })
    }

    fn row_to_nonce(row: &rusqlite::Row) -> rusqlite::Result<NonceCommitment> {
        Ok(NonceCommitment {
            session_id: row.get("session_id")?,
            participant_id: row.get("participant_id")?,
            signer_index: row.get::<_, i64>("signer_index")? as u16,
            commitment: row.get("commitment")?,
            submitted_at: row.get::<_, i64>("submitted_at")? as u64,
        })
    }

    fn row_to_partial(row: &rusqlite::Row) -> rusqlite::Result<PartialSignature> {
        Ok(PartialSignature {
            session_id: row.get("session_id")?,
            participant_id: row.get("participant_id")?,
            signer_index: row.get::<_, i64>("signer_index")? as u16,
            share: row.get("share")?,
            submitted_at: row.get::<_, i64>("submitted_at")? as u64,
        })
    }

    fn row_to_vote(row: &rusqlite::Row) -> rusqlite::Result<ApprovalVote> {
        let mfa = row
            .get::<_, Option<String>>("mfa")?
            .map(|s| serde_json::from_str::<PhysicalMfaSignature>(&s))
            .transpose()
            .map_err(|e| invalid("mfa", e))?;

        Ok(ApprovalVote {
            session_id: row.get("session_id")?,
            voter_id: row.get("voter_id")?,
            approved: row.get::<_, i64>("approved")? != 0,
            mfa,
            reason: row.get("reason")?,
            cast_at: row.get::<_, i64>("cast_at")? as u64,
        })
    }

    fn row_to_audit(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
        let event: String = row.get("event")?;
        let severity: String = row.get("severity")?;
        let detail: String = row.get("detail")?;

        Ok(AuditEntry {
            id: Some(row.get("id")?),
            session_id: row.get("session_id")?,
            event: event.parse().map_err(|e| invalid("event", e))?,
            severity: severity.parse().map_err(|e| invalid("severity", e))?,
            reason_code: row.get("reason_code")?,
            actor_role: row.get("actor_role")?,
            detail: serde_json::from_str(&detail).map_err(|e| invalid("detail", e))?,
            recorded_at: row.get::<_, i64>("recorded_at")? as u64,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_session_sync(&self, session: &SigningSession) -> StorageResult<()> {
        let conn = self.conn()?;
        let payload = serde_json::to_string(&session.payload)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO sessions (
                id, federation_id, requester_id, status, payload, message_hash,
                operation_amount, threshold, participant_count, created_at,
                expires_at, updated_at, version, signature, artifact_id,
                failure_reason, failure_detail
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17
            )
            "#,
            params![
                session.id,
                session.federation_id,
                session.requester_id,
                session.status.as_str(),
                payload,
                session.message_hash,
                session.operation_amount.map(|v| v as i64),
                session.threshold as i64,
                session.participant_count as i64,
                session.created_at as i64,
                session.expires_at as i64,
                session.updated_at as i64,
                session.version as i64,
                session.signature,
                session.artifact_id,
                session.failure_reason.map(|r| r.as_str()),
                session.failure_detail,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::Duplicate(session.id.clone());
            }
            db_err(e)
        })?;

        Ok(())
    }

    fn get_session_sync(&self, id: &str) -> StorageResult<Option<SigningSession>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?1",
            params![id],
            Self::row_to_session,
        )
        .optional()
        .map_err(db_err)
    }

    fn update_where(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(sql, params).map_err(db_err)?;
        Ok(rows == 1)
    }

    fn compare_and_set_status_sync(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: u64,
    ) -> StorageResult<bool> {
        if !from.can_transition_to(to) {
            return Err(StorageError::InvalidData(format!(
                "illegal transition {} -> {}",
                from, to
            )));
        }
        self.update_where(
            r#"
            UPDATE sessions SET status = ?3, updated_at = ?4, version = version + 1
            WHERE id = ?1 AND status = ?2
            "#,
            params![id, from.as_str(), to.as_str(), now as i64],
        )
    }

    fn complete_session_sync(&self, id: &str, signature: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            r#"
            UPDATE sessions
            SET status = 'completed', signature = ?2, updated_at = ?3, version = version + 1
            WHERE id = ?1 AND status = 'aggregating'
            "#,
            params![id, signature, now as i64],
        )
    }

    fn fail_session_sync(
        &self,
        id: &str,
        reason: FailureReason,
        detail: Option<&str>,
        now: u64,
    ) -> StorageResult<bool> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET status = 'failed', failure_reason = ?2, failure_detail = ?3,
                updated_at = ?4, version = version + 1
            WHERE id = ?1 AND status IN {}
            "#,
            NON_TERMINAL
        );
        self.update_where(&sql, params![id, reason.as_str(), detail, now as i64])
    }

    fn expire_session_sync(&self, id: &str, now: u64) -> StorageResult<bool> {
        let sql = format!(
            r#"
            UPDATE sessions
            SET status = 'expired', updated_at = ?2, version = version + 1
            WHERE id = ?1 AND expires_at <= ?2 AND status IN {}
            "#,
            NON_TERMINAL
        );
        self.update_where(&sql, params![id, now as i64])
    }

    fn set_artifact_id_sync(&self, id: &str, artifact_id: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            r#"
            UPDATE sessions SET artifact_id = ?2, updated_at = ?3, version = version + 1
            WHERE id = ?1 AND status = 'completed' AND artifact_id IS NULL
            "#,
            params![id, artifact_id, now as i64],
        )
    }

    fn list_past_deadline_sync(&self, now: u64) -> StorageResult<Vec<SigningSession>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT * FROM sessions
            WHERE expires_at <= ?1 AND status IN {}
            ORDER BY expires_at ASC
            "#,
            NON_TERMINAL
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let sessions = stmt
            .query_map(params![now as i64], Self::row_to_session)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(sessions)
    }

    fn record_nonce_sync(&self, nonce: &NonceCommitment, threshold: u16) -> StorageResult<u16> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let already_submitted: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM nonce_commitments WHERE session_id = ?1 AND participant_id = ?2)",
                params![nonce.session_id, nonce.participant_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if already_submitted {
            return Err(StorageError::Duplicate(nonce.participant_id.clone()));
        }

        let seen_anywhere: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM nonce_commitments WHERE commitment = ?1)",
                params![nonce.commitment],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if seen_anywhere {
            return Err(StorageError::CommitmentReused);
        }

        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM nonce_commitments WHERE session_id = ?1",
                params![nonce.session_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if count >= threshold as i64 {
            return Err(StorageError::RoundClosed(nonce.session_id.clone()));
        }

        tx.execute(
            r#"
            INSERT INTO nonce_commitments (session_id, participant_id, signer_index, commitment, submitted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                nonce.session_id,
                nonce.participant_id,
                nonce.signer_index as i64,
                nonce.commitment,
                nonce.submitted_at as i64,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::CommitmentReused;
            }
            db_err(e)
        })?;

        tx.commit().map_err(db_err)?;
        Ok((count + 1) as u16)
    }

    fn nonces_for_session_sync(&self, session_id: &str) -> StorageResult<Vec<NonceCommitment>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM nonce_commitments WHERE session_id = ?1 ORDER BY seq ASC")
            .map_err(db_err)?;

        let nonces = stmt
            .query_map(params![session_id], Self::row_to_nonce)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(nonces)
    }

    fn record_partial_signature_sync(&self, share: &PartialSignature) -> StorageResult<u16> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let committed: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM nonce_commitments WHERE session_id = ?1 AND participant_id = ?2)",
                params![share.session_id, share.participant_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if !committed {
            return Err(StorageError::NotFound(share.participant_id.clone()));
        }

        tx.execute(
            r#"
            INSERT INTO partial_signatures (session_id, participant_id, signer_index, share, submitted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                share.session_id,
                share.participant_id,
                share.signer_index as i64,
                share.share,
                share.submitted_at as i64,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::Duplicate(share.participant_id.clone());
            }
            db_err(e)
        })?;

        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM partial_signatures WHERE session_id = ?1",
                params![share.session_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(count as u16)
    }

    fn partials_for_session_sync(&self, session_id: &str) -> StorageResult<Vec<PartialSignature>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM partial_signatures WHERE session_id = ?1 ORDER BY seq ASC")
            .map_err(db_err)?;

        let shares = stmt
            .query_map(params![session_id], Self::row_to_partial)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(shares)
    }

    fn record_vote_sync(&self, vote: &ApprovalVote) -> StorageResult<()> {
        let conn = self.conn()?;
        let mfa = vote
            .mfa
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO approval_votes (session_id, voter_id, approved, mfa, reason, cast_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                vote.session_id,
                vote.voter_id,
                vote.approved as i64,
                mfa,
                vote.reason,
                vote.cast_at as i64,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::Duplicate(vote.voter_id.clone());
            }
            db_err(e)
        })?;

        Ok(())
    }

    fn votes_for_session_sync(&self, session_id: &str) -> StorageResult<Vec<ApprovalVote>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM approval_votes WHERE session_id = ?1 ORDER BY seq ASC")
            .map_err(db_err)?;

        let votes = stmt
            .query_map(params![session_id], Self::row_to_vote)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(votes)
    }

    fn record_mfa_verification_sync(&self, record: &MfaVerificationRecord) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO mfa_verifications (operation_hash, device_id, session_id, participant_id, verified_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.operation_hash,
                record.device_id,
                record.session_id,
                record.participant_id,
                record.verified_at as i64,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::Duplicate(record.device_id.clone());
            }
            db_err(e)
        })?;

        Ok(())
    }

    fn get_mfa_verification_sync(
        &self,
        operation_hash: &str,
        device_id: &str,
    ) -> StorageResult<Option<MfaVerificationRecord>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM mfa_verifications WHERE operation_hash = ?1 AND device_id = ?2",
            params![operation_hash, device_id],
            |row| {
                Ok(MfaVerificationRecord {
                    operation_hash: row.get("operation_hash")?,
                    device_id: row.get("device_id")?,
                    session_id: row.get("session_id")?,
                    participant_id: row.get("participant_id")?,
                    verified_at: row.get::<_, i64>("verified_at")? as u64,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn append_audit_sync(&self, entry: &AuditEntry) -> StorageResult<i64> {
        let conn = self.conn()?;
        let detail = serde_json::to_string(&entry.detail)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO audit_log (session_id, event, severity, reason_code, actor_role, detail, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                entry.session_id,
                entry.event.as_str(),
                entry.severity.as_str(),
                entry.reason_code,
                entry.actor_role,
                detail,
                entry.recorded_at as i64,
            ],
        )
        .map_err(db_err)?;

        Ok(conn.last_insert_rowid())
    }

    fn audit_for_session_sync(&self, session_id: &str) -> StorageResult<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM audit_log WHERE session_id = ?1 ORDER BY id ASC")
            .map_err(db_err)?;

        let entries = stmt
            .query_map(params![session_id], Self::row_to_audit)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(entries)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &SigningSession) -> StorageResult<()> {
        self.insert_session_sync(session)
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<SigningSession>> {
        self.get_session_sync(id)
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: u64,
    ) -> StorageResult<bool> {
        self.compare_and_set_status_sync(id, from, to, now)
    }

    async fn complete_session(&self, id: &str, signature: &str, now: u64) -> StorageResult<bool> {
        self.complete_session_sync(id, signature, now)
    }

    async fn fail_session(
        &self,
        id: &str,
        reason: FailureReason,
        detail: Option<&str>,
        now: u64,
    ) -> StorageResult<bool> {
        self.fail_session_sync(id, reason, detail, now)
    }

    async fn expire_session(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.expire_session_sync(id, now)
    }

    async fn set_artifact_id(&self, id: &str, artifact_id: &str, now: u64) -> StorageResult<bool> {
        self.set_artifact_id_sync(id, artifact_id, now)
    }

    async fn list_past_deadline(&self, now: u64) -> StorageResult<Vec<SigningSession>> {
        self.list_past_deadline_sync(now)
    }
}

#[async_trait]
impl ContributionLedger for SqliteStore {
    async fn record_nonce(
        &self,
        commitment: &NonceCommitment,
        threshold: u16,
    ) -> StorageResult<u16> {
        self.record_nonce_sync(commitment, threshold)
    }

    async fn nonces_for_session(&self, session_id: &str) -> StorageResult<Vec<NonceCommitment>> {
        self.nonces_for_session_sync(session_id)
    }

    async fn record_partial_signature(&self, share: &PartialSignature) -> StorageResult<u16> {
        self.record_partial_signature_sync(share)
    }

    async fn partials_for_session(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<PartialSignature>> {
        self.partials_for_session_sync(session_id)
    }
}

#[async_trait]
impl ApprovalStore for SqliteStore {
    async fn record_vote(&self, vote: &ApprovalVote) -> StorageResult<()> {
        self.record_vote_sync(vote)
    }

    async fn votes_for_session(&self, session_id: &str) -> StorageResult<Vec<ApprovalVote>> {
        self.votes_for_session_sync(session_id)
    }

    async fn record_mfa_verification(&self, record: &MfaVerificationRecord) -> StorageResult<()> {
        self.record_mfa_verification_sync(record)
    }

    async fn get_mfa_verification(
        &self,
        operation_hash: &str,
        device_id: &str,
    ) -> StorageResult<Option<MfaVerificationRecord>> {
        self.get_mfa_verification_sync(operation_hash, device_id)
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<i64> {
        self.append_audit_sync(entry)
    }

    async fn audit_for_session(&self, session_id: &str) -> StorageResult<Vec<AuditEntry>> {
        self.audit_for_session_sync(session_id)
    }
}
