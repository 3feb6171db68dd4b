//! Session monitor: the runtime around the [`TimerEngine`].
//!
//! The monitor owns the single active-session slot, wires every engine
//! transition to the envelope store, the view channel and the event
//! subscribers, and runs the two periodic tasks (one-second tick, remote
//! flush) while the engine is running.
//!
//! Commands other than [`SessionMonitor::finish`] return immediately and must
//! be called from within a tokio runtime, since `start` spawns tasks and
//! `pause` spawns its flush.

mod slot;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::Result;
use crate::events::Event;
use crate::session::{MonitorableSession, SessionUpdate};
use crate::storage::{read_envelope, Config, EnvelopeStore, DEFAULT_ENVELOPE_KEY};
use crate::sync::{SessionRepository, SyncStatus};
use crate::timer::{reconcile, TimerEngine, TimerView};

use slot::{ActiveSlot, Shared};
use tasks::{write_progress, RunningTasks};

/// Tunables for a [`SessionMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub envelope_key: String,
    pub tick_interval: Duration,
    pub sync_interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            envelope_key: DEFAULT_ENVELOPE_KEY.to_string(),
            tick_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for MonitorOptions {
    fn from(config: &Config) -> Self {
        Self {
            envelope_key: config.storage.envelope_key.clone(),
            tick_interval: config.timer.tick_interval(),
            sync_interval: config.timer.sync_interval(),
        }
    }
}

pub struct SessionMonitor {
    shared: Arc<Shared>,
    tick_interval: Duration,
    sync_interval: Duration,
}

impl SessionMonitor {
    /// Create an idle monitor. Call [`initialize`](Self::initialize) to pick
    /// up a persisted session.
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        repository: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(store, options.envelope_key, repository, clock)),
            tick_interval: options.tick_interval,
            sync_interval: options.sync_interval,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn view(&self) -> TimerView {
        self.shared.lock().engine.snapshot(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().engine.is_running()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.lock().engine.elapsed_seconds(Instant::now())
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.shared.lock().sync.clone()
    }

    /// Latest view, updated on every transition and every tick.
    pub fn watch(&self) -> watch::Receiver<TimerView> {
        self.shared.watch()
    }

    /// Transition events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Reconcile against the persisted envelope.
    ///
    /// A running snapshot is credited with the wall-clock time that passed
    /// since it was written and resumes running; a stopped one is restored
    /// as-is. Unreadable envelopes are dropped and the monitor stays idle.
    /// Does nothing if a session is already loaded.
    pub fn initialize(&self) -> Option<Event> {
        let mut slot = self.shared.lock();
        if slot.engine.session().is_some() {
            return None;
        }
        let envelope = read_envelope(self.shared.store.as_ref(), &self.shared.envelope_key)?;
        let reconciled = reconcile(&envelope.timer, self.shared.clock.now_ms());
        let now = Instant::now();
        let event = match slot.engine.restore(
            envelope.session,
            reconciled.elapsed_seconds,
            envelope.timer.last_synced_seconds,
            reconciled.drift_seconds,
            reconciled.resume,
            now,
        ) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "persisted session could not be restored");
                return None;
            }
        };
        tracing::info!(
            session_id = ?slot.engine.session_id(),
            elapsed = reconciled.elapsed_seconds,
            drift = reconciled.drift_seconds,
            resumed = reconciled.resume,
            "restored session from envelope"
        );
        if reconciled.resume {
            self.spawn_tasks(&mut slot);
        }
        // Re-stamp right away so a second restart does not credit the same
        // drift twice.
        self.shared.persist(&slot, now);
        self.shared.publish(&slot, now, Some(&event));
        Some(event)
    }

    /// Replace the active session.
    ///
    /// `Some` seeds elapsed time from the session and stops any running
    /// tick. `None` empties the slot and removes the envelope. Ignored while
    /// a finish is in flight.
    ///
    /// # Errors
    /// Returns a validation error for a session that is already finished.
    pub fn set_active_session(&self, session: Option<MonitorableSession>) -> Result<Option<Event>> {
        let mut slot = self.shared.lock();
        if slot.engine.is_finishing() {
            return Ok(None);
        }
        let now = Instant::now();
        let event = match session {
            Some(session) => {
                // Validate before touching the running stretch.
                let mut engine = TimerEngine::new();
                let event = engine.load(session)?;
                slot.stop_tasks();
                slot.engine = engine;
                slot.reset_sync();
                tracing::info!(session_id = ?slot.engine.session_id(), "active session set");
                Some(event)
            }
            None => {
                slot.stop_tasks();
                slot.reset_sync();
                let event = slot.engine.clear();
                if event.is_some() {
                    tracing::info!("active session cleared");
                }
                event
            }
        };
        self.shared.persist(&slot, now);
        self.shared.publish(&slot, now, event.as_ref());
        Ok(event)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `Stopped -> Running`; spawns the tick and the periodic flush.
    pub fn start(&self) -> Option<Event> {
        let mut slot = self.shared.lock();
        let now = Instant::now();
        let event = slot.engine.start(now, self.shared.clock.now_utc())?;
        self.spawn_tasks(&mut slot);
        tracing::info!(session_id = ?slot.engine.session_id(), "timer started");
        self.shared.persist(&slot, now);
        self.shared.publish(&slot, now, Some(&event));
        Some(event)
    }

    /// `Running -> Stopped`; cancels both tasks and fires one progress write
    /// without waiting for it.
    pub fn pause(&self) -> Option<Event> {
        let mut slot = self.shared.lock();
        let now = Instant::now();
        let event = slot.engine.pause(now)?;
        slot.stop_tasks();
        if let Event::TimerPaused {
            session_id,
            elapsed_secs,
            ..
        } = &event
        {
            tracing::info!(%session_id, elapsed = elapsed_secs, "timer paused");
            slot.sync.in_flight += 1;
            tokio::spawn(write_progress(
                Arc::clone(&self.shared),
                session_id.clone(),
                *elapsed_secs,
            ));
        }
        self.shared.persist(&slot, now);
        self.shared.publish(&slot, now, Some(&event));
        Some(event)
    }

    /// Zero the counter and stop; a never-started session is discarded.
    pub fn reset(&self) -> Option<Event> {
        let mut slot = self.shared.lock();
        let now = Instant::now();
        let event = slot.engine.reset(now)?;
        slot.stop_tasks();
        if matches!(event, Event::SessionDiscarded { .. }) {
            slot.reset_sync();
        }
        tracing::info!(session_id = ?event.session_id(), "timer reset");
        self.shared.persist(&slot, now);
        self.shared.publish(&slot, now, Some(&event));
        Some(event)
    }

    /// Close the session with `notes`.
    ///
    /// Progress writes still in flight are awaited first, so the closing
    /// write is always the last one the repository sees. The closing write
    /// is awaited too. Only when it succeeds are the envelope
    /// and the in-memory session cleared. On failure the session stays
    /// loaded and stopped with its elapsed time frozen, so the call can be
    /// retried. Returns `Ok(None)` when there is nothing to finish or another
    /// finish is already in flight.
    ///
    /// # Errors
    /// Returns the repository error when the closing write fails.
    pub async fn finish(&self, notes: impl Into<String>) -> Result<Option<Event>> {
        let notes = notes.into();
        let request = {
            let mut slot = self.shared.lock();
            let now = Instant::now();
            let Some(request) = slot.engine.begin_finish(now) else {
                return Ok(None);
            };
            slot.stop_tasks();
            let event = Event::FinishRequested {
                session_id: request.session_id.clone(),
                elapsed_secs: request.elapsed_seconds,
                at: chrono::Utc::now(),
            };
            self.shared.persist(&slot, now);
            self.shared.publish(&slot, now, Some(&event));
            request
        };

        // Ticks are cancelled and begin_finish froze the counter, so no new
        // progress write can start while we wait.
        self.shared.progress_writes_settled().await;

        let ended_at = self.shared.clock.now_utc();
        let update = SessionUpdate::finish(request.elapsed_seconds, notes.clone(), ended_at);
        let result = self
            .shared
            .repository
            .update(&request.session_id, &update)
            .await;

        let mut slot = self.shared.lock();
        let now = Instant::now();
        match result {
            Ok(()) => {
                let event = slot.engine.complete_finish(notes, ended_at);
                slot.reset_sync();
                tracing::info!(
                    session_id = %request.session_id,
                    elapsed = request.elapsed_seconds,
                    "session finished"
                );
                self.shared.persist(&slot, now);
                self.shared.publish(&slot, now, event.as_ref());
                Ok(event)
            }
            Err(e) => {
                slot.engine.abort_finish();
                tracing::warn!(
                    session_id = %request.session_id,
                    error = %e,
                    "finishing session failed; session kept for retry"
                );
                let event = Event::FinishFailed {
                    session_id: request.session_id,
                    message: e.to_string(),
                    at: chrono::Utc::now(),
                };
                self.shared.persist(&slot, now);
                self.shared.publish(&slot, now, Some(&event));
                Err(e.into())
            }
        }
    }

    /// Stop the periodic tasks and write a final snapshot, leaving the
    /// envelope in place for the next process to reconcile.
    pub fn shutdown(&self) {
        let mut slot = self.shared.lock();
        slot.stop_tasks();
        let now = Instant::now();
        if slot.engine.session().is_some() {
            self.shared.persist(&slot, now);
        }
    }

    fn spawn_tasks(&self, slot: &mut ActiveSlot) {
        slot.stop_tasks();
        slot.tasks = Some(RunningTasks::spawn(
            &self.shared,
            slot.engine.generation(),
            self.tick_interval,
            self.sync_interval,
        ));
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.shared.lock().stop_tasks();
    }
}
