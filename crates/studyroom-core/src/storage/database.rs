//! SQLite-backed session persistence.
//!
//! Implements [`SessionPersistence`] for the CLI: sessions are loaded once
//! at startup and upserted after every change the scheduler makes. Rows that
//! cannot be decoded are skipped on load so one bad record never hides the
//! rest.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::warn;

use super::data_dir;
use crate::error::{CoreError, DatabaseError, Result};
use crate::persistence::SessionPersistence;
use crate::session::Session;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite database for session storage.
pub struct SessionDb {
    conn: Mutex<Connection>,
}

impl SessionDb {
    /// Open the database at `~/.config/studyroom/studyroom.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("studyroom.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id                  TEXT PRIMARY KEY,
                subject             TEXT NOT NULL,
                topic               TEXT NOT NULL DEFAULT '',
                scheduled_at        TEXT NOT NULL,
                cycle_duration_secs INTEGER NOT NULL,
                total_cycles        INTEGER NOT NULL,
                completed           INTEGER NOT NULL DEFAULT 0,
                fired_at            TEXT,
                abandoned_at_cycle  INTEGER,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_scheduled_at ON sessions(scheduled_at);",
        )?;
        Ok(())
    }
}

impl SessionPersistence for SessionDb {
    fn load_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, subject, topic, scheduled_at, cycle_duration_secs, total_cycles,
                    completed, fired_at, abandoned_at_cycle, created_at
             FROM sessions ORDER BY scheduled_at, id",
        )?;
        let rows = stmt.query_map([], RawSession::from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            match row.map_err(DatabaseError::from).and_then(RawSession::decode) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(error = %e, "skipping unreadable session row"),
            }
        }
        Ok(sessions)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let cycle_duration_secs = i64::try_from(session.cycle_duration_secs).map_err(|_| {
            CoreError::InvalidSpec(format!(
                "cycle duration {}s of session {} is too large to store",
                session.cycle_duration_secs, session.id
            ))
        })?;
        self.conn().execute(
            "INSERT OR REPLACE INTO sessions
             (id, subject, topic, scheduled_at, cycle_duration_secs, total_cycles,
              completed, fired_at, abandoned_at_cycle, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.subject,
                session.topic,
                session.scheduled_at.format(TIMESTAMP_FORMAT).to_string(),
                cycle_duration_secs,
                session.total_cycles,
                session.completed,
                session
                    .fired_at
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
                session.abandoned_at_cycle,
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(())
    }
}

/// Row as stored, before timestamp parsing.
struct RawSession {
    id: String,
    subject: String,
    topic: String,
    scheduled_at: String,
    cycle_duration_secs: i64,
    total_cycles: u32,
    completed: bool,
    fired_at: Option<String>,
    abandoned_at_cycle: Option<u32>,
    created_at: String,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject: row.get(1)?,
            topic: row.get(2)?,
            scheduled_at: row.get(3)?,
            cycle_duration_secs: row.get(4)?,
            total_cycles: row.get(5)?,
            completed: row.get(6)?,
            fired_at: row.get(7)?,
            abandoned_at_cycle: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Session, DatabaseError> {
        let corrupt = |message: String| DatabaseError::CorruptRow {
            id: self.id.clone(),
            message,
        };
        let parse_local = |s: &str| {
            NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .map_err(|e| corrupt(format!("bad timestamp '{s}': {e}")))
        };

        let scheduled_at = parse_local(&self.scheduled_at)?;
        let fired_at = self.fired_at.as_deref().map(parse_local).transpose()?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        let cycle_duration_secs = u64::try_from(self.cycle_duration_secs)
            .map_err(|_| corrupt("negative cycle duration".into()))?;

        Ok(Session {
            id: self.id,
            subject: self.subject,
            topic: self.topic,
            scheduled_at,
            cycle_duration_secs,
            total_cycles: self.total_cycles,
            completed: self.completed,
            fired_at,
            abandoned_at_cycle: self.abandoned_at_cycle,
            created_at,
        })
    }
}
