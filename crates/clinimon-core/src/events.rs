use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every state change of the monitored session produces an Event.
/// Commands return it to the caller; subscribers receive a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A session was placed into the active slot.
    SessionLoaded {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// A session was rebuilt from the persisted envelope on startup.
    SessionRestored {
        session_id: String,
        elapsed_secs: u64,
        /// Whole seconds credited for time spent while not resident.
        drift_secs: u64,
        resumed: bool,
        at: DateTime<Utc>,
    },
    /// The active slot was emptied without finishing.
    SessionCleared {
        session_id: Option<String>,
        at: DateTime<Utc>,
    },
    /// `reset` before the first `start` throws the session away.
    SessionDiscarded {
        session_id: String,
        at: DateTime<Utc>,
    },
    TimerStarted {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        session_id: String,
        at: DateTime<Utc>,
    },
    /// The closing write was dispatched and is awaited.
    FinishRequested {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SessionFinished {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// The closing write failed; the session stays open.
    FinishFailed {
        session_id: String,
        message: String,
        at: DateTime<Utc>,
    },
    SyncCompleted {
        session_id: String,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SyncFailed {
        session_id: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Session the event refers to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::SessionCleared { session_id, .. } => session_id.as_deref(),
            Event::SessionLoaded { session_id, .. }
            | Event::SessionRestored { session_id, .. }
            | Event::SessionDiscarded { session_id, .. }
            | Event::TimerStarted { session_id, .. }
            | Event::TimerPaused { session_id, .. }
            | Event::TimerReset { session_id, .. }
            | Event::FinishRequested { session_id, .. }
            | Event::SessionFinished { session_id, .. }
            | Event::FinishFailed { session_id, .. }
            | Event::SyncCompleted { session_id, .. }
            | Event::SyncFailed { session_id, .. } => Some(session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::TimerPaused {
            session_id: "s-1".into(),
            elapsed_secs: 65,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TimerPaused");
        assert_eq!(json["elapsed_secs"], 65);
        assert_eq!(event.session_id(), Some("s-1"));
    }
}
