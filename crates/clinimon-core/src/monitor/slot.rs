//! The single active-session slot and the state shared with periodic tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;

use super::tasks::RunningTasks;
use crate::clock::Clock;
use crate::events::Event;
use crate::storage::{clear_envelope, write_envelope, Envelope, EnvelopeStore};
use crate::sync::{SessionRepository, SyncStatus};
use crate::timer::{TimerEngine, TimerView};

/// Everything that must change together when the active session changes.
///
/// There is exactly one of these per monitor, so at most one session is
/// active at a time and its periodic tasks live and die with it.
#[derive(Default)]
pub(crate) struct ActiveSlot {
    pub(crate) engine: TimerEngine,
    pub(crate) tasks: Option<RunningTasks>,
    pub(crate) sync: SyncStatus,
}

impl ActiveSlot {
    /// Cancel both periodic tasks of the current running stretch, if any.
    pub(crate) fn stop_tasks(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.cancel();
        }
    }

    /// Forget the sync outcome of the previous session. Writes still in
    /// flight keep being counted until they land.
    pub(crate) fn reset_sync(&mut self) {
        self.sync = SyncStatus {
            in_flight: self.sync.in_flight,
            ..SyncStatus::default()
        };
    }
}

pub(crate) struct Shared {
    slot: Mutex<ActiveSlot>,
    pub(crate) store: Arc<dyn EnvelopeStore>,
    pub(crate) envelope_key: String,
    pub(crate) repository: Arc<dyn SessionRepository>,
    pub(crate) clock: Arc<dyn Clock>,
    view_tx: watch::Sender<TimerView>,
    events_tx: broadcast::Sender<Event>,
    /// Signalled whenever the last in-flight progress write lands.
    writes_idle: Notify,
}

impl Shared {
    pub(crate) fn new(
        store: Arc<dyn EnvelopeStore>,
        envelope_key: String,
        repository: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (view_tx, _) = watch::channel(TimerView::idle());
        let (events_tx, _) = broadcast::channel(64);
        Self {
            slot: Mutex::new(ActiveSlot::default()),
            store,
            envelope_key,
            repository,
            clock,
            view_tx,
            events_tx,
            writes_idle: Notify::new(),
        }
    }

    /// Lock the slot. A poisoned lock still holds consistent engine state
    /// because every engine command completes before it returns.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ActiveSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot the slot into the durable store, or remove the envelope when
    /// the slot is empty.
    pub(crate) fn persist(&self, slot: &ActiveSlot, now: Instant) {
        match Envelope::capture(&slot.engine, now, self.clock.now_ms()) {
            Some(envelope) => {
                write_envelope(self.store.as_ref(), &self.envelope_key, &envelope);
            }
            None => clear_envelope(self.store.as_ref(), &self.envelope_key),
        }
    }

    /// Push the current view to watchers and `event` to subscribers.
    pub(crate) fn publish(&self, slot: &ActiveSlot, now: Instant, event: Option<&Event>) {
        self.view_tx.send_replace(slot.engine.snapshot(now));
        if let Some(event) = event {
            // No subscribers is fine.
            let _ = self.events_tx.send(event.clone());
        }
    }

    /// Called by a progress write once its outcome is recorded.
    pub(crate) fn progress_write_landed(&self, slot: &mut ActiveSlot) {
        slot.sync.in_flight = slot.sync.in_flight.saturating_sub(1);
        if slot.sync.in_flight == 0 {
            self.writes_idle.notify_waiters();
        }
    }

    /// Resolve once no progress write is in flight.
    pub(crate) async fn progress_writes_settled(&self) {
        loop {
            let idle = self.writes_idle.notified();
            tokio::pin!(idle);
            // Register before checking so a write landing in between is seen.
            idle.as_mut().enable();
            let in_flight = self.lock().sync.in_flight;
            if in_flight == 0 {
                return;
            }
            tracing::debug!(in_flight, "waiting for progress writes to land");
            idle.await;
        }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<TimerView> {
        self.view_tx.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}
