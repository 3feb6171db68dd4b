//! The two periodic tasks of a running stretch.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::slot::Shared;
use crate::events::Event;
use crate::session::SessionUpdate;
use crate::sync::spawn_periodic;

/// The one-second tick and the remote flush of one running stretch.
///
/// Both hang off one parent token; cancelling (or dropping) this value stops
/// them together.
pub(crate) struct RunningTasks {
    token: CancellationToken,
}

impl RunningTasks {
    pub(crate) fn spawn(
        shared: &Arc<Shared>,
        generation: u64,
        tick_period: Duration,
        sync_period: Duration,
    ) -> Self {
        let token = CancellationToken::new();

        let tick_shared = Arc::clone(shared);
        spawn_periodic(
            tick_period,
            MissedTickBehavior::Skip,
            token.child_token(),
            move || {
                on_tick(&tick_shared, generation);
                std::future::ready(())
            },
        );

        let sync_shared = Arc::clone(shared);
        spawn_periodic(
            sync_period,
            MissedTickBehavior::Delay,
            token.child_token(),
            move || periodic_flush(Arc::clone(&sync_shared), generation),
        );

        tracing::debug!(generation, "spawned tick and sync tasks");
        Self { token }
    }

    pub(crate) fn cancel(self) {
        self.token.cancel();
    }
}

impl Drop for RunningTasks {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn on_tick(shared: &Shared, generation: u64) {
    let now = Instant::now();
    let mut slot = shared.lock();
    if slot.engine.generation() != generation {
        return;
    }
    if slot.engine.tick(now).is_some() {
        shared.persist(&slot, now);
        shared.publish(&slot, now, None);
    }
}

async fn periodic_flush(shared: Arc<Shared>, generation: u64) {
    let (session_id, elapsed) = {
        let mut slot = shared.lock();
        if slot.engine.generation() != generation || !slot.engine.is_running() {
            return;
        }
        let Some(session_id) = slot.engine.session_id() else {
            return;
        };
        let pending = (session_id.to_string(), slot.engine.elapsed_seconds(Instant::now()));
        slot.sync.in_flight += 1;
        pending
    };
    write_progress(shared, session_id, elapsed).await;
}

/// Best-effort progress write. The outcome only lands in the slot if the
/// same session is still active when the answer arrives.
///
/// The caller counts the write in `sync.in_flight` under the same lock that
/// read `elapsed`, so a finish can never slip in between.
pub(crate) async fn write_progress(shared: Arc<Shared>, session_id: String, elapsed: u64) {
    let result = shared
        .repository
        .update(&session_id, &SessionUpdate::progress(elapsed))
        .await;

    let now = Instant::now();
    let mut slot = shared.lock();
    shared.progress_write_landed(&mut slot);
    let same_session = slot.engine.session_id() == Some(session_id.as_str());
    let event = match result {
        Ok(()) => {
            tracing::debug!(%session_id, elapsed, "synced session progress");
            if same_session {
                slot.sync.record_success(elapsed, shared.clock.now_utc());
                slot.engine.mark_synced(elapsed);
                shared.persist(&slot, now);
            }
            Event::SyncCompleted {
                session_id,
                elapsed_secs: elapsed,
                at: chrono::Utc::now(),
            }
        }
        Err(e) => {
            tracing::warn!(
                %session_id,
                elapsed,
                transient = e.is_transient(),
                error = %e,
                "session progress sync failed"
            );
            if same_session {
                slot.sync.record_failure(e.to_string());
            }
            Event::SyncFailed {
                session_id,
                message: e.to_string(),
                at: chrono::Utc::now(),
            }
        }
    };
    shared.publish(&slot, now, Some(&event));
}
