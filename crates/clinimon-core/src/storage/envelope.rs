//! Persistence bridge for the active-session envelope.
//!
//! The envelope `{ session, timer }` is written as one JSON document under a
//! single fixed key. Absence of the key means "no active session". Reading
//! never fails: anything unreadable is logged, dropped, and treated as absent.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::database::Database;
use crate::error::StoreError;
use crate::session::MonitorableSession;
use crate::timer::TimerEngine;

pub const DEFAULT_ENVELOPE_KEY: &str = "active_monitoring_session";

/// Timer half of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub is_running: bool,
    pub elapsed_seconds: u64,
    pub last_synced_seconds: u64,
    /// Epoch ms of the write. Only reconciliation reads it.
    pub last_timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session: MonitorableSession,
    pub timer: TimerSnapshot,
}

impl Envelope {
    /// Snapshot the engine as of `now`, stamped with wall time `now_ms`.
    /// `None` when the engine holds no session.
    pub fn capture(engine: &TimerEngine, now: Instant, now_ms: u64) -> Option<Self> {
        let mut session = engine.session()?.clone();
        let elapsed_seconds = engine.elapsed_seconds(now);
        session.elapsed_seconds = elapsed_seconds;
        Some(Self {
            session,
            timer: TimerSnapshot {
                is_running: engine.is_running(),
                elapsed_seconds,
                last_synced_seconds: engine.last_synced_seconds(),
                last_timestamp_ms: now_ms,
            },
        })
    }
}

/// A durable client-local key-value store holding raw envelope JSON.
pub trait EnvelopeStore: Send + Sync {
    fn load_raw(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save_raw(&self, key: &str, raw: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl EnvelopeStore for Database {
    fn load_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.kv_get(key)
    }

    fn save_raw(&self, key: &str, raw: &str) -> Result<(), StoreError> {
        self.kv_set(key, raw)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.kv_delete(key)
    }
}

/// Process-local store, used by tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryEnvelopeStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

impl EnvelopeStore for MemoryEnvelopeStore {
    fn load_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn save_raw(&self, key: &str, raw: &str) -> Result<(), StoreError> {
        self.entries.lock()?.insert(key.to_string(), raw.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock()?.remove(key);
        Ok(())
    }
}

/// Read the envelope under `key`.
///
/// Missing, unreadable, malformed or already-finished envelopes all come back
/// as `None`; the broken ones are removed so the next start is clean.
pub fn read_envelope(store: &dyn EnvelopeStore, key: &str) -> Option<Envelope> {
    let raw = match store.load_raw(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted session envelope");
            return None;
        }
    };

    match serde_json::from_str::<Envelope>(&raw) {
        Ok(envelope) if envelope.session.is_finished() => {
            tracing::warn!(
                session_id = %envelope.session.id,
                "discarding envelope of an already finished session"
            );
            clear_envelope(store, key);
            None
        }
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding corrupt session envelope");
            clear_envelope(store, key);
            None
        }
    }
}

/// Write `envelope` under `key`. Failures are logged and reported as `false`.
pub fn write_envelope(store: &dyn EnvelopeStore, key: &str, envelope: &Envelope) -> bool {
    let raw = match serde_json::to_string(envelope) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize session envelope");
            return false;
        }
    };
    match store.save_raw(key, &raw) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to persist session envelope");
            false
        }
    }
}

/// Remove the envelope. Failures are logged.
pub fn clear_envelope(store: &dyn EnvelopeStore, key: &str) {
    if let Err(e) = store.remove(key) {
        tracing::warn!(key, error = %e, "failed to remove session envelope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    fn envelope() -> Envelope {
        let mut session =
            MonitorableSession::from_calendar("appt-1", "c-1", "therapy", "Weekly").unwrap();
        session.status = SessionStatus::Running;
        session.elapsed_seconds = 100;
        Envelope {
            session,
            timer: TimerSnapshot {
                is_running: true,
                elapsed_seconds: 100,
                last_synced_seconds: 90,
                last_timestamp_ms: 1_700_000_000_000,
            },
        }
    }

    #[test]
    fn envelope_wire_shape() {
        let json = serde_json::to_value(envelope()).unwrap();
        assert_eq!(json["timer"]["isRunning"], true);
        assert_eq!(json["timer"]["lastSyncedSeconds"], 90);
        assert_eq!(json["timer"]["lastTimestampMs"], 1_700_000_000_000u64);
        assert_eq!(json["session"]["status"], "running");
    }

    #[test]
    fn write_then_read_returns_envelope() {
        let store = MemoryEnvelopeStore::new();
        assert!(read_envelope(&store, DEFAULT_ENVELOPE_KEY).is_none());
        assert!(write_envelope(&store, DEFAULT_ENVELOPE_KEY, &envelope()));
        assert_eq!(read_envelope(&store, DEFAULT_ENVELOPE_KEY), Some(envelope()));
        clear_envelope(&store, DEFAULT_ENVELOPE_KEY);
        assert!(!store.contains(DEFAULT_ENVELOPE_KEY));
    }

    #[test]
    fn malformed_json_is_discarded() {
        let store = MemoryEnvelopeStore::new();
        store.save_raw(DEFAULT_ENVELOPE_KEY, "{not json").unwrap();
        assert!(read_envelope(&store, DEFAULT_ENVELOPE_KEY).is_none());
        assert!(!store.contains(DEFAULT_ENVELOPE_KEY));
    }

    #[test]
    fn schema_mismatch_is_discarded() {
        let store = MemoryEnvelopeStore::new();
        store
            .save_raw(
                DEFAULT_ENVELOPE_KEY,
                r#"{"session": {"id": "x"}, "timer": {"isRunning": "yes"}}"#,
            )
            .unwrap();
        assert!(read_envelope(&store, DEFAULT_ENVELOPE_KEY).is_none());

        store
            .save_raw(
                DEFAULT_ENVELOPE_KEY,
                r#"{"session": null, "timer": {"isRunning": true, "elapsedSeconds": -4,
                    "lastSyncedSeconds": 0, "lastTimestampMs": 0}}"#,
            )
            .unwrap();
        assert!(read_envelope(&store, DEFAULT_ENVELOPE_KEY).is_none());
    }

    #[test]
    fn finished_session_envelope_is_discarded() {
        let store = MemoryEnvelopeStore::new();
        let mut stale = envelope();
        stale.session.status = SessionStatus::Finished;
        write_envelope(&store, DEFAULT_ENVELOPE_KEY, &stale);
        assert!(read_envelope(&store, DEFAULT_ENVELOPE_KEY).is_none());
        assert!(!store.contains(DEFAULT_ENVELOPE_KEY));
    }

    #[test]
    fn database_is_an_envelope_store() {
        let db = Database::open_memory().unwrap();
        write_envelope(&db, "k", &envelope());
        assert_eq!(read_envelope(&db, "k"), Some(envelope()));
        clear_envelope(&db, "k");
        assert!(db.kv_get("k").unwrap().is_none());
    }
}
