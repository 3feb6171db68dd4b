//! SQLite-backed local storage.
//!
//! Provides persistent storage for:
//! - The key-value table the active-session envelope lives in
//! - A local `sessions` table that stands in for the remote repository when
//!   no endpoint is configured

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::data_dir;
use crate::error::{Result, StoreError};
use crate::session::{MonitorableSession, SessionSource, SessionStatus, SessionUpdate};

/// SQLite database for local state.
///
/// The connection sits behind a mutex so the handle can be shared with the
/// periodic tasks.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/clinimon/clinimon.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("clinimon.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id              TEXT PRIMARY KEY,
                client_id       TEXT NOT NULL,
                session_type    TEXT NOT NULL,
                source          TEXT NOT NULL,
                title           TEXT NOT NULL DEFAULT '',
                notes           TEXT NOT NULL DEFAULT '',
                elapsed_seconds INTEGER NOT NULL DEFAULT 0,
                status          TEXT NOT NULL,
                started_at      TEXT,
                ended_at        TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_client_id ON sessions(client_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);",
        )?;
        Ok(())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a key from the kv store. Removing a missing key is fine.
    pub fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Insert or fully replace a session row.
    pub fn upsert_session(&self, session: &MonitorableSession) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions
                (id, client_id, session_type, source, title, notes,
                 elapsed_seconds, status, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.client_id,
                session.session_type,
                session.source.as_str(),
                session.title,
                session.notes,
                session.elapsed_seconds,
                session.status.as_str(),
                session.started_at.map(|t| t.to_rfc3339()),
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<MonitorableSession>, StoreError> {
        let conn = self.conn.lock()?;
        let session = conn
            .query_row(
                "SELECT id, client_id, session_type, source, title, notes,
                        elapsed_seconds, status, started_at, ended_at
                 FROM sessions WHERE id = ?1",
                params![id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Apply a partial update. Returns `false` when no row has that id.
    pub fn apply_session_update(
        &self,
        id: &str,
        update: &SessionUpdate,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET
                elapsed_seconds = COALESCE(?2, elapsed_seconds),
                notes           = COALESCE(?3, notes),
                status          = COALESCE(?4, status),
                ended_at        = COALESCE(?5, ended_at)
             WHERE id = ?1",
            params![
                id,
                update.elapsed_seconds,
                update.notes,
                update.status.map(|s| s.as_str()),
                update.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Number of finished sessions recorded for a client.
    pub fn finished_count(&self, client_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE client_id = ?1 AND status = 'finished'",
            params![client_id],
            |row| row.get::<_, u64>(0),
        )?;
        Ok(count)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<MonitorableSession> {
    let source: String = row.get(3)?;
    let status: String = row.get(7)?;
    let started_at: Option<String> = row.get(8)?;
    let ended_at: Option<String> = row.get(9)?;
    Ok(MonitorableSession {
        id: row.get(0)?,
        client_id: row.get(1)?,
        session_type: row.get(2)?,
        source: if source == "calendar" {
            SessionSource::Calendar
        } else {
            SessionSource::Manual
        },
        title: row.get(4)?,
        notes: row.get(5)?,
        elapsed_seconds: row.get(6)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Paused),
        started_at: started_at.as_deref().and_then(parse_ts),
        ended_at: ended_at.as_deref().and_then(parse_ts),
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        db.kv_delete("test").unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_delete("test").unwrap();
    }

    #[test]
    fn session_upsert_and_partial_update() {
        let db = Database::open_memory().unwrap();
        let session =
            MonitorableSession::from_calendar("appt-1", "c-1", "therapy", "Weekly").unwrap();
        db.upsert_session(&session).unwrap();

        assert!(db
            .apply_session_update("appt-1", &SessionUpdate::progress(30))
            .unwrap());
        let stored = db.get_session("appt-1").unwrap().unwrap();
        assert_eq!(stored.elapsed_seconds, 30);
        assert_eq!(stored.status, SessionStatus::NotStarted);
        assert_eq!(stored.title, "Weekly");

        let ended = Utc::now();
        db.apply_session_update("appt-1", &SessionUpdate::finish(65, "calm".into(), ended))
            .unwrap();
        let stored = db.get_session("appt-1").unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Finished);
        assert_eq!(stored.notes, "calm");
        assert_eq!(stored.ended_at.map(|t| t.timestamp()), Some(ended.timestamp()));
        assert_eq!(db.finished_count("c-1").unwrap(), 1);
    }

    #[test]
    fn update_of_unknown_session_reports_false() {
        let db = Database::open_memory().unwrap();
        assert!(!db
            .apply_session_update("missing", &SessionUpdate::progress(1))
            .unwrap());
    }

    #[test]
    fn open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinimon.db");
        let db = Database::open_at(&path).unwrap();
        db.kv_set("k", "v").unwrap();
        drop(db);
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));
    }
}
