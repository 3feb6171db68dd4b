//! Wall-clock reconciliation.
//!
//! A running timer that was written to the envelope keeps "running" while the
//! process is gone. On the next start the time that passed since the last
//! snapshot write is credited in whole seconds, exactly once.

use crate::storage::TimerSnapshot;

/// Outcome of reconciling one persisted timer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub elapsed_seconds: u64,
    pub drift_seconds: u64,
    /// Whether the timer should resume running.
    pub resume: bool,
}

/// Correct `snapshot` for the wall-clock time between its write and `now_ms`.
///
/// A stopped timer is restored unchanged. A clock that moved backwards yields
/// zero drift rather than taking time away.
pub fn reconcile(snapshot: &TimerSnapshot, now_ms: u64) -> Reconciled {
    if !snapshot.is_running {
        return Reconciled {
            elapsed_seconds: snapshot.elapsed_seconds,
            drift_seconds: 0,
            resume: false,
        };
    }
    let drift_seconds = now_ms.saturating_sub(snapshot.last_timestamp_ms) / 1000;
    Reconciled {
        elapsed_seconds: snapshot.elapsed_seconds.saturating_add(drift_seconds),
        drift_seconds,
        resume: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(is_running: bool, elapsed_seconds: u64, last_timestamp_ms: u64) -> TimerSnapshot {
        TimerSnapshot {
            is_running,
            elapsed_seconds,
            last_synced_seconds: 0,
            last_timestamp_ms,
        }
    }

    #[test]
    fn running_snapshot_gains_floored_drift() {
        let now = 1_700_000_000_000;
        let r = reconcile(&snapshot(true, 100, now - 45_000), now);
        assert_eq!(r.elapsed_seconds, 145);
        assert_eq!(r.drift_seconds, 45);
        assert!(r.resume);

        let r = reconcile(&snapshot(true, 10, now - 2_999), now);
        assert_eq!(r.elapsed_seconds, 12);
    }

    #[test]
    fn stopped_snapshot_is_unchanged() {
        let now = 1_700_000_000_000;
        let r = reconcile(&snapshot(false, 100, now - 3_600_000), now);
        assert_eq!(r.elapsed_seconds, 100);
        assert_eq!(r.drift_seconds, 0);
        assert!(!r.resume);
    }

    #[test]
    fn backwards_clock_adds_nothing() {
        let now = 1_700_000_000_000;
        let r = reconcile(&snapshot(true, 100, now + 60_000), now);
        assert_eq!(r.elapsed_seconds, 100);
        assert!(r.resume);
    }
}
