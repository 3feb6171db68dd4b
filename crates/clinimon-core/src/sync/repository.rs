//! The remote session repository seam and its in-process implementations.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::SyncError;
use crate::session::SessionUpdate;
use crate::storage::Database;

/// Where session progress and the closing record are written.
///
/// The engine treats this purely as an interface: retries and durability are
/// the implementation's business.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<(), SyncError>;
}

/// Offline mode: updates land in the local `sessions` table.
#[async_trait]
impl SessionRepository for Database {
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<(), SyncError> {
        if self.apply_session_update(session_id, update)? {
            Ok(())
        } else {
            Err(SyncError::SessionNotFound(session_id.to_string()))
        }
    }
}

/// One write seen by [`RecordingRepository`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub session_id: String,
    pub update: SessionUpdate,
}

#[derive(Debug, Default)]
struct RecorderState {
    writes: Vec<RecordedWrite>,
    attempts: usize,
    fail_remaining: usize,
    fail_always: bool,
    delay: Option<Duration>,
    progress_delay: Option<Duration>,
}

/// In-memory repository that records every write and can be told to fail.
///
/// Failed attempts are counted but not recorded as writes.
#[derive(Debug, Default)]
pub struct RecordingRepository {
    state: Mutex<RecorderState>,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes.
    pub fn fail_next(&self, n: usize) {
        self.with_state(|s| s.fail_remaining = n);
    }

    /// Fail every write until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.with_state(|s| s.fail_always = failing);
    }

    /// Hold every write for `delay` (tokio time) before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.delay = delay);
    }

    /// Hold progress writes (no status change) for `delay`, on top of any
    /// delay set with [`set_delay`](Self::set_delay).
    pub fn set_progress_delay(&self, delay: Option<Duration>) {
        self.with_state(|s| s.progress_delay = delay);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.with_state(|s| s.writes.clone())
    }

    /// Number of `update` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.with_state(|s| s.attempts)
    }

    /// Elapsed values of the successful progress and finish writes, in order.
    pub fn elapsed_values(&self) -> Vec<u64> {
        self.with_state(|s| {
            s.writes
                .iter()
                .filter_map(|w| w.update.elapsed_seconds)
                .collect()
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RecorderState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }
}

#[async_trait]
impl SessionRepository for RecordingRepository {
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<(), SyncError> {
        let delays = self.with_state(|s| {
            s.attempts += 1;
            let progress = s.progress_delay.filter(|_| update.status.is_none());
            [s.delay, progress]
        });
        for delay in delays.into_iter().flatten() {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            if s.fail_always {
                return Err(SyncError::Unavailable("injected failure".into()));
            }
            if s.fail_remaining > 0 {
                s.fail_remaining -= 1;
                return Err(SyncError::Unavailable("injected failure".into()));
            }
            s.writes.push(RecordedWrite {
                session_id: session_id.to_string(),
                update: update.clone(),
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MonitorableSession;

    #[tokio::test]
    async fn recording_repository_counts_failures_separately() {
        let repo = RecordingRepository::new();
        repo.fail_next(1);
        assert!(repo.update("s-1", &SessionUpdate::progress(1)).await.is_err());
        assert!(repo.update("s-1", &SessionUpdate::progress(2)).await.is_ok());
        assert_eq!(repo.attempts(), 2);
        assert_eq!(repo.elapsed_values(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_delay_leaves_status_writes_alone() {
        let repo = RecordingRepository::new();
        repo.set_progress_delay(Some(Duration::from_secs(5)));

        let started = tokio::time::Instant::now();
        let update = SessionUpdate::finish(10, "n".into(), chrono::Utc::now());
        repo.update("s-1", &update).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        repo.update("s-1", &SessionUpdate::progress(10)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn database_repository_requires_known_session() {
        let db = Database::open_memory().unwrap();
        let err = db.update("nope", &SessionUpdate::progress(5)).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionNotFound(_)));

        let session = MonitorableSession::manual("c-1", "assessment").unwrap();
        db.upsert_session(&session).unwrap();
        db.update(&session.id, &SessionUpdate::progress(5)).await.unwrap();
        assert_eq!(db.get_session(&session.id).unwrap().unwrap().elapsed_seconds, 5);
    }
}
