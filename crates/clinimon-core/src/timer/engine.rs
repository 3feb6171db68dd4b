//! Timer engine implementation.
//!
//! The engine is a pure state machine over one monitored session. It owns no
//! threads or timers: the caller passes the current monotonic instant into
//! every command and drives `tick()` from its own periodic task.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Stopped <-> Running
//!            |           |
//!            +-> Finished <-+
//! ```
//!
//! Elapsed time is banked per running stretch: each `start` anchors an
//! instant, and `elapsed = accumulated + (now - anchor)`. A late or missed
//! tick therefore never loses time and never counts a second twice.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ValidationError;
use crate::events::Event;
use crate::session::{MonitorableSession, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    /// No session loaded.
    Idle,
    /// Session loaded, tick inactive.
    Stopped,
    Running,
    /// Terminal. The finished session has already left the engine.
    Finished,
}

/// Read-only view of the engine handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerView {
    pub state: TimerState,
    pub session: Option<MonitorableSession>,
    pub elapsed_seconds: u64,
    pub is_running: bool,
    /// A finish write is in flight; every control is locked.
    pub finishing: bool,
}

impl TimerView {
    pub fn idle() -> Self {
        Self {
            state: TimerState::Idle,
            session: None,
            elapsed_seconds: 0,
            is_running: false,
            finishing: false,
        }
    }
}

/// What `begin_finish` froze and must be written remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishRequest {
    pub session_id: String,
    pub elapsed_seconds: u64,
}

/// Core timer engine.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    state: TimerState,
    session: Option<MonitorableSession>,
    /// Time banked from earlier running stretches (and the seeded value).
    accumulated: Duration,
    /// Anchor of the current running stretch.
    running_since: Option<Instant>,
    last_synced_seconds: u64,
    /// Whole seconds last reported by `tick`.
    last_reported: u64,
    /// Bumped on every entry into `Running`; periodic tasks compare it
    /// before touching anything.
    generation: u64,
    finishing: bool,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerEngine {
    pub fn new() -> Self {
        Self {
            state: TimerState::Idle,
            session: None,
            accumulated: Duration::ZERO,
            running_since: None,
            last_synced_seconds: 0,
            last_reported: 0,
            generation: 0,
            finishing: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    pub fn session(&self) -> Option<&MonitorableSession> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_synced_seconds(&self) -> u64 {
        self.last_synced_seconds
    }

    pub fn elapsed_seconds(&self, now: Instant) -> u64 {
        self.elapsed(now).as_secs()
    }

    pub fn snapshot(&self, now: Instant) -> TimerView {
        let elapsed_seconds = self.elapsed_seconds(now);
        TimerView {
            state: self.state,
            session: self.session.clone().map(|mut s| {
                s.elapsed_seconds = elapsed_seconds;
                s
            }),
            elapsed_seconds,
            is_running: self.is_running(),
            finishing: self.finishing,
        }
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Place `session` in the engine, replacing whatever was there.
    ///
    /// Elapsed time is seeded from the session and the engine stops.
    pub fn load(&mut self, session: MonitorableSession) -> Result<Event, ValidationError> {
        if session.is_finished() {
            return Err(ValidationError::SessionFinished {
                session_id: session.id,
            });
        }
        let elapsed = session.elapsed_seconds;
        let event = Event::SessionLoaded {
            session_id: session.id.clone(),
            elapsed_secs: elapsed,
            at: Utc::now(),
        };
        self.install(session, elapsed, 0);
        Ok(event)
    }

    /// Rebuild from a persisted snapshot whose elapsed value has already been
    /// reconciled against the wall clock. When `resume` is set the engine
    /// continues running from `elapsed_seconds`.
    pub fn restore(
        &mut self,
        session: MonitorableSession,
        elapsed_seconds: u64,
        last_synced_seconds: u64,
        drift_secs: u64,
        resume: bool,
        now: Instant,
    ) -> Result<Event, ValidationError> {
        if session.is_finished() {
            return Err(ValidationError::SessionFinished {
                session_id: session.id,
            });
        }
        let session_id = session.id.clone();
        self.install(session, elapsed_seconds, last_synced_seconds);
        if resume {
            self.enter_running(now);
        }
        Ok(Event::SessionRestored {
            session_id,
            elapsed_secs: elapsed_seconds,
            drift_secs,
            resumed: resume,
            at: Utc::now(),
        })
    }

    /// Empty the engine without finishing. Returns `None` when already empty.
    pub fn clear(&mut self) -> Option<Event> {
        let had_session = self.session.is_some();
        let session_id = self.session.take().map(|s| s.id);
        let was_finished = self.state == TimerState::Finished;
        self.state = TimerState::Idle;
        self.zero();
        self.finishing = false;
        if !had_session && !was_finished {
            return None;
        }
        Some(Event::SessionCleared {
            session_id,
            at: Utc::now(),
        })
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `Stopped -> Running`. `started_at` is stamped with `at` on the very
    /// first start.
    pub fn start(&mut self, now: Instant, at: DateTime<Utc>) -> Option<Event> {
        if self.state != TimerState::Stopped || self.finishing {
            return None;
        }
        let session = self.session.as_mut()?;
        if session.started_at.is_none() {
            session.started_at = Some(at);
        }
        session.status = SessionStatus::Running;
        let session_id = session.id.clone();
        self.enter_running(now);
        Some(Event::TimerStarted {
            session_id,
            elapsed_secs: self.elapsed_seconds(now),
            at: Utc::now(),
        })
    }

    /// `Running -> Stopped`. No-op in every other state.
    pub fn pause(&mut self, now: Instant) -> Option<Event> {
        if self.state != TimerState::Running || self.finishing {
            return None;
        }
        self.leave_running(now);
        let elapsed_secs = self.elapsed_seconds(now);
        let session = self.session.as_mut()?;
        session.status = SessionStatus::Paused;
        session.elapsed_seconds = elapsed_secs;
        Some(Event::TimerPaused {
            session_id: session.id.clone(),
            elapsed_secs,
            at: Utc::now(),
        })
    }

    /// Zero the counter and stop. A session that never started is discarded
    /// instead, leaving the engine `Idle`.
    pub fn reset(&mut self, now: Instant) -> Option<Event> {
        if self.finishing {
            return None;
        }
        match self.state {
            TimerState::Idle | TimerState::Finished => None,
            TimerState::Stopped | TimerState::Running => {
                if self.is_running() {
                    self.leave_running(now);
                }
                let never_started = self.session.as_ref().is_some_and(|s| !s.has_started());
                if never_started {
                    let session_id = self.session.take()?.id;
                    self.state = TimerState::Idle;
                    self.zero();
                    return Some(Event::SessionDiscarded {
                        session_id,
                        at: Utc::now(),
                    });
                }
                self.zero();
                self.state = TimerState::Stopped;
                let session = self.session.as_mut()?;
                session.elapsed_seconds = 0;
                session.status = SessionStatus::Paused;
                Some(Event::TimerReset {
                    session_id: session.id.clone(),
                    at: Utc::now(),
                })
            }
        }
    }

    /// Call once a second while running. Returns the new whole-second value
    /// when it changed since the last report.
    pub fn tick(&mut self, now: Instant) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        let elapsed = self.elapsed_seconds(now);
        if elapsed == self.last_reported {
            return None;
        }
        self.last_reported = elapsed;
        if let Some(session) = self.session.as_mut() {
            session.elapsed_seconds = elapsed;
        }
        Some(elapsed)
    }

    /// Freeze the timer for the closing write. Returns `None` when there is
    /// nothing to finish or a finish is already in flight.
    pub fn begin_finish(&mut self, now: Instant) -> Option<FinishRequest> {
        if self.finishing || !matches!(self.state, TimerState::Running | TimerState::Stopped) {
            return None;
        }
        if self.is_running() {
            self.leave_running(now);
        }
        let elapsed_seconds = self.elapsed_seconds(now);
        let session = self.session.as_mut()?;
        session.elapsed_seconds = elapsed_seconds;
        if session.has_started() {
            session.status = SessionStatus::Paused;
        }
        self.finishing = true;
        Some(FinishRequest {
            session_id: session.id.clone(),
            elapsed_seconds,
        })
    }

    /// The closing write succeeded: the session leaves the engine for good.
    pub fn complete_finish(&mut self, notes: String, ended_at: DateTime<Utc>) -> Option<Event> {
        if !self.finishing {
            return None;
        }
        let mut session = self.session.take()?;
        session.notes = notes;
        session.status = SessionStatus::Finished;
        session.ended_at = Some(ended_at);
        let elapsed_secs = session.elapsed_seconds;
        self.finishing = false;
        self.state = TimerState::Finished;
        self.zero();
        Some(Event::SessionFinished {
            session_id: session.id,
            elapsed_secs,
            at: Utc::now(),
        })
    }

    /// The closing write failed: unlock commands, keep the session stopped.
    pub fn abort_finish(&mut self) {
        self.finishing = false;
    }

    /// Record a successful remote write of `elapsed_seconds`.
    pub fn mark_synced(&mut self, elapsed_seconds: u64) {
        self.last_synced_seconds = elapsed_seconds;
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn install(&mut self, session: MonitorableSession, elapsed_seconds: u64, last_synced: u64) {
        self.session = Some(session);
        self.state = TimerState::Stopped;
        self.accumulated = Duration::from_secs(elapsed_seconds);
        self.running_since = None;
        self.last_synced_seconds = last_synced;
        self.last_reported = elapsed_seconds;
        self.finishing = false;
        if let Some(session) = self.session.as_mut() {
            session.elapsed_seconds = elapsed_seconds;
        }
    }

    fn enter_running(&mut self, now: Instant) {
        self.state = TimerState::Running;
        self.running_since = Some(now);
        self.generation = self.generation.wrapping_add(1);
        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Running;
        }
    }

    fn leave_running(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
        self.state = TimerState::Stopped;
        self.last_reported = self.accumulated.as_secs();
    }

    fn zero(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
        self.last_reported = 0;
        self.last_synced_seconds = 0;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + now.saturating_duration_since(since),
            None => self.accumulated,
        }
    }
}
