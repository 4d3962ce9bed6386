//! SQLite database for CraftCloud state persistence
//!
//! Tables:
//! - users: local accounts, linked to an upstream panel user
//! - sessions: opaque session tokens (stored hashed)
//! - servers: ownership records for upstream servers (one per owner)
//! - provisioning_jobs: resumable provisioning sequences (one per owner email)

use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Stored session row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode; the web server and the daemon share this file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                panel_user_id INTEGER,
                panel_api_key TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);

            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                external_server_id INTEGER NOT NULL,
                external_identifier TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                plan_type TEXT NOT NULL,
                is_demo INTEGER NOT NULL DEFAULT 0,
                demo_expires_at INTEGER,
                suspended_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_servers_demo ON servers(is_demo, suspended_at, demo_expires_at);

            CREATE TABLE IF NOT EXISTS provisioning_jobs (
                id TEXT PRIMARY KEY,
                owner_email TEXT NOT NULL UNIQUE,
                user_id TEXT,
                state TEXT NOT NULL,
                upstream_user_id INTEGER,
                external_server_id INTEGER,
                external_identifier TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON provisioning_jobs(state, updated_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Insert a user. Fails with `AlreadyExists` when the email is taken.
    pub fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        panel_user_id: Option<u64>,
        panel_api_key: Option<&str>,
    ) -> Result<UserRecord> {
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            panel_user_id,
            panel_api_key: panel_api_key.map(String::from),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, email, name, password_hash, panel_user_id, panel_api_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.email,
                user.name,
                user.password_hash,
                user.panel_user_id.map(|v| v as i64),
                user.panel_api_key,
                to_millis(user.created_at),
            ],
        )
        .map_err(|e| unique_violation(e, "user", email))?;

        debug!("Inserted user {}", user.id);
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id.to_string()],
                user_from_row,
            )
            .optional()?)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email],
                user_from_row,
            )
            .optional()?)
    }

    pub fn count_users(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let session = SessionRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            created_at: Utc::now(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                user_id.to_string(),
                session.token_hash,
                to_millis(expires_at),
                to_millis(session.created_at),
            ],
        )?;
        Ok(session)
    }

    pub fn get_session(&self, token_hash: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, user_id, token_hash, expires_at, created_at FROM sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(SessionRecord {
                        id: uuid_at(row, 0)?,
                        user_id: uuid_at(row, 1)?,
                        token_hash: row.get(2)?,
                        expires_at: from_millis(row.get(3)?),
                        created_at: from_millis(row.get(4)?),
                    })
                },
            )
            .optional()?)
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])?;
        Ok(n > 0)
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![to_millis(now)])?;
        Ok(n)
    }

    // ========================================================================
    // Servers
    // ========================================================================

    /// Insert an ownership record. One server per owner.
    pub fn create_server(&self, server: &ServerInstance) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO servers (id, owner_user_id, external_server_id, external_identifier, name,
                                  plan_type, is_demo, demo_expires_at, suspended_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                server.id.to_string(),
                server.owner_user_id.to_string(),
                server.external_server_id as i64,
                server.external_identifier,
                server.name,
                server.plan_type.to_string(),
                server.is_demo,
                server.demo_expires_at.map(to_millis),
                server.suspended_at.map(to_millis),
                to_millis(server.created_at),
            ],
        )
        .map_err(|e| unique_violation(e, "server", &server.owner_user_id))?;

        debug!("Inserted server {} for owner {}", server.external_identifier, server.owner_user_id);
        Ok(())
    }

    /// Ownership-scoped lookup: the identifier must belong to `owner`.
    pub fn get_server_for_owner(&self, identifier: &str, owner: Uuid) -> Result<Option<ServerInstance>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM servers WHERE external_identifier = ?1 AND owner_user_id = ?2",
                    SERVER_COLUMNS
                ),
                params![identifier, owner.to_string()],
                server_from_row,
            )
            .optional()?)
    }

    pub fn get_server_by_owner(&self, owner: Uuid) -> Result<Option<ServerInstance>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM servers WHERE owner_user_id = ?1", SERVER_COLUMNS),
                params![owner.to_string()],
                server_from_row,
            )
            .optional()?)
    }

    /// Demo servers past their expiry that have not been suspended yet.
    pub fn list_expired_demos(&self, now: DateTime<Utc>) -> Result<Vec<ServerInstance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM servers
             WHERE is_demo = 1 AND suspended_at IS NULL AND demo_expires_at IS NOT NULL AND demo_expires_at <= ?1
             ORDER BY demo_expires_at",
            SERVER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![to_millis(now)], server_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn mark_suspended(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE servers SET suspended_at = ?1 WHERE id = ?2",
            params![to_millis(at), id.to_string()],
        )?;
        if n == 0 {
            return Err(Error::not_found("server", id));
        }
        Ok(())
    }

    // ========================================================================
    // Provisioning jobs
    // ========================================================================

    /// Return the job for `owner_email`, creating it in `account_creating` if absent.
    pub fn claim_job(&self, owner_email: &str) -> Result<ProvisioningJob> {
        let now = to_millis(Utc::now());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO provisioning_jobs (id, owner_email, state, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![
                Uuid::new_v4().to_string(),
                owner_email,
                ProvisioningState::AccountCreating.to_string(),
                now,
            ],
        )?;
        Ok(conn.query_row(
            &format!("SELECT {} FROM provisioning_jobs WHERE owner_email = ?1", JOB_COLUMNS),
            params![owner_email],
            job_from_row,
        )?)
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<ProvisioningJob>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM provisioning_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.to_string()],
                job_from_row,
            )
            .optional()?)
    }

    pub fn get_job_by_identifier(&self, identifier: &str) -> Result<Option<ProvisioningJob>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM provisioning_jobs WHERE external_identifier = ?1", JOB_COLUMNS),
                params![identifier],
                job_from_row,
            )
            .optional()?)
    }

    /// Persist every mutable field of `job` and bump `updated_at`.
    pub fn update_job(&self, job: &mut ProvisioningJob) -> Result<()> {
        job.updated_at = Utc::now();
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE provisioning_jobs
             SET user_id = ?1, state = ?2, upstream_user_id = ?3, external_server_id = ?4,
                 external_identifier = ?5, attempts = ?6, last_error = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                job.user_id.map(|id| id.to_string()),
                job.state.to_string(),
                job.upstream_user_id.map(|v| v as i64),
                job.external_server_id.map(|v| v as i64),
                job.external_identifier,
                job.attempts,
                job.last_error,
                to_millis(job.updated_at),
                job.id.to_string(),
            ],
        )?;
        if n == 0 {
            return Err(Error::not_found("provisioning job", job.id));
        }
        Ok(())
    }

    /// Jobs stuck in a post-creation step with no progress since `stale_before`.
    pub fn list_resumable_jobs(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<ProvisioningJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM provisioning_jobs
             WHERE state IN ('awaiting_install', 'eula_writing', 'starting', 'failed')
               AND external_identifier IS NOT NULL
               AND attempts < ?1
               AND updated_at <= ?2
             ORDER BY updated_at",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![max_attempts, to_millis(stale_before)], job_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

const USER_COLUMNS: &str = "id, email, name, password_hash, panel_user_id, panel_api_key, created_at";

const SERVER_COLUMNS: &str = "id, owner_user_id, external_server_id, external_identifier, name, \
     plan_type, is_demo, demo_expires_at, suspended_at, created_at";

const JOB_COLUMNS: &str = "id, owner_email, user_id, state, upstream_user_id, external_server_id, \
     external_identifier, attempts, last_error, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        panel_user_id: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        panel_api_key: row.get(5)?,
        created_at: from_millis(row.get(6)?),
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerInstance> {
    Ok(ServerInstance {
        id: uuid_at(row, 0)?,
        owner_user_id: uuid_at(row, 1)?,
        external_server_id: row.get::<_, i64>(2)? as u64,
        external_identifier: row.get(3)?,
        name: row.get(4)?,
        plan_type: parse_at(row, 5)?,
        is_demo: row.get(6)?,
        demo_expires_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
        suspended_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
        created_at: from_millis(row.get(9)?),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ProvisioningJob> {
    let user_id = match row.get::<_, Option<String>>(2)? {
        Some(s) => Some(Uuid::parse_str(&s).map_err(|e| conversion_error(2, e))?),
        None => None,
    };
    Ok(ProvisioningJob {
        id: uuid_at(row, 0)?,
        owner_email: row.get(1)?,
        user_id,
        state: parse_at(row, 3)?,
        upstream_user_id: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        external_server_id: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        external_identifier: row.get(6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn parse_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>()
        .map_err(|e| conversion_error(idx, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn unique_violation(e: rusqlite::Error, kind: &str, id: impl ToString) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            }
        }
        _ => Error::Database(e),
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
