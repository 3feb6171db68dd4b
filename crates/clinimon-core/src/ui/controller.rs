//! Headless view-model for the session panel.
//!
//! The controller renders the monitor's view, gates controls and drives the
//! confirmation step that must precede `finish`. Front ends (the CLI, a
//! desktop shell) only draw what [`SessionController::panel`] returns.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use super::format::format_hms;
use super::gates::ControlGates;
use crate::directory::ClientDirectory;
use crate::error::{Result, ValidationError};
use crate::events::Event;
use crate::monitor::SessionMonitor;
use crate::sync::SyncStatus;
use crate::timer::{TimerState, TimerView};

/// What the user must acknowledge before a session is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishConfirmation {
    pub session_id: String,
    pub session_type: String,
    pub client_name: String,
    pub elapsed_seconds: u64,
}

impl fmt::Display for FinishConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Finish {} session with {} after {}?",
            self.session_type,
            self.client_name,
            format_hms(self.elapsed_seconds)
        )
    }
}

/// Everything a front end needs to draw the panel.
#[derive(Debug, Clone, Serialize)]
pub struct Panel {
    pub state: TimerState,
    pub session_id: Option<String>,
    pub session_type: Option<String>,
    pub title: Option<String>,
    pub client_name: Option<String>,
    pub client_birth_date: Option<NaiveDate>,
    /// Sessions the client has on record; `None` for clients outside the
    /// directory.
    pub client_sessions: Option<u32>,
    pub elapsed_seconds: u64,
    pub elapsed: String,
    pub finishing: bool,
    pub controls: ControlGates,
    pub sync: SyncStatus,
    pub last_error: Option<String>,
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(session_id) = &self.session_id else {
            writeln!(f, "No active session")?;
            if let Some(err) = &self.last_error {
                writeln!(f, "Error:    {err}")?;
            }
            return Ok(());
        };

        let state = if self.finishing {
            "finishing".to_string()
        } else {
            format!("{:?}", self.state).to_lowercase()
        };

        writeln!(f, "Session:  {session_id}")?;
        match self.title.as_deref().filter(|t| !t.is_empty()) {
            Some(title) => writeln!(
                f,
                "Type:     {} ({title})",
                self.session_type.as_deref().unwrap_or("-")
            )?,
            None => writeln!(f, "Type:     {}", self.session_type.as_deref().unwrap_or("-"))?,
        }
        let client_name = self.client_name.as_deref().unwrap_or("-");
        match (self.client_birth_date, self.client_sessions) {
            (Some(born), Some(n)) => writeln!(
                f,
                "Client:   {client_name} (born {}, {n} sessions)",
                born.format("%Y-%m-%d")
            )?,
            (None, Some(n)) => writeln!(f, "Client:   {client_name} ({n} sessions)")?,
            _ => writeln!(f, "Client:   {client_name}")?,
        }
        writeln!(f, "Elapsed:  {} [{state}]", self.elapsed)?;

        let on_off = |enabled: bool| if enabled { "on" } else { "off" };
        writeln!(
            f,
            "Controls: start:{} pause:{} reset:{} finish:{}",
            on_off(self.controls.start),
            on_off(self.controls.pause),
            on_off(self.controls.reset),
            on_off(self.controls.finish),
        )?;

        match (self.sync.last_synced_seconds, self.sync.last_synced_at) {
            (Some(secs), Some(at)) => writeln!(
                f,
                "Synced:   {} at {}",
                format_hms(secs),
                at.format("%H:%M:%S")
            )?,
            _ => writeln!(f, "Synced:   never")?,
        }
        if let Some(err) = &self.sync.last_error {
            writeln!(f, "Sync:     degraded ({err})")?;
        }
        if let Some(err) = &self.last_error {
            writeln!(f, "Error:    {err}")?;
        }
        Ok(())
    }
}

pub struct SessionController {
    monitor: Arc<SessionMonitor>,
    directory: Arc<dyn ClientDirectory>,
    pending: Option<FinishConfirmation>,
    last_error: Option<String>,
}

impl SessionController {
    pub fn new(monitor: Arc<SessionMonitor>, directory: Arc<dyn ClientDirectory>) -> Self {
        Self {
            monitor,
            directory,
            pending: None,
            last_error: None,
        }
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    pub fn gates(&self) -> ControlGates {
        ControlGates::for_view(&self.monitor.view())
    }

    pub fn start(&mut self) -> Option<Event> {
        if !self.gates().start {
            return None;
        }
        self.pending = None;
        self.monitor.start()
    }

    pub fn pause(&mut self) -> Option<Event> {
        if !self.gates().pause {
            return None;
        }
        self.monitor.pause()
    }

    pub fn reset(&mut self) -> Option<Event> {
        if !self.gates().reset {
            return None;
        }
        self.pending = None;
        self.monitor.reset()
    }

    /// First half of finishing: returns what must be shown to the user, or
    /// `None` when finishing is not currently allowed.
    pub fn request_finish(&mut self) -> Option<FinishConfirmation> {
        let view = self.monitor.view();
        if !ControlGates::for_view(&view).finish {
            return None;
        }
        let session = view.session?;
        let confirmation = FinishConfirmation {
            client_name: self.directory.display_name(&session.client_id),
            session_id: session.id,
            session_type: session.session_type,
            elapsed_seconds: view.elapsed_seconds,
        };
        self.pending = Some(confirmation.clone());
        Some(confirmation)
    }

    pub fn cancel_finish(&mut self) {
        self.pending = None;
    }

    /// Second half of finishing: dispatches the closing write.
    ///
    /// # Errors
    /// [`ValidationError::ConfirmationRequired`] when no confirmation is
    /// pending for the current session; otherwise whatever the monitor's
    /// finish returns, which is also kept as [`last_error`](Self::last_error).
    pub async fn confirm_finish(&mut self, notes: impl Into<String>) -> Result<Option<Event>> {
        let Some(pending) = self.pending.take() else {
            return Err(ValidationError::ConfirmationRequired.into());
        };
        let current = self.monitor.view().session.map(|s| s.id);
        if current.as_deref() != Some(pending.session_id.as_str()) {
            return Err(ValidationError::ConfirmationRequired.into());
        }
        match self.monitor.finish(notes).await {
            Ok(event) => {
                self.last_error = None;
                Ok(event)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn panel(&self) -> Panel {
        self.panel_for(&self.monitor.view())
    }

    pub fn panel_for(&self, view: &TimerView) -> Panel {
        let session = view.session.as_ref();
        let client = session.and_then(|s| self.directory.client(&s.client_id));
        Panel {
            state: view.state,
            session_id: session.map(|s| s.id.clone()),
            session_type: session.map(|s| s.session_type.clone()),
            title: session.map(|s| s.title.clone()),
            client_name: session.map(|s| self.directory.display_name(&s.client_id)),
            client_birth_date: client.as_ref().and_then(|c| c.birth_date),
            client_sessions: client.map(|c| c.total_sessions),
            elapsed_seconds: view.elapsed_seconds,
            elapsed: format_hms(view.elapsed_seconds),
            finishing: view.finishing,
            controls: ControlGates::for_view(view),
            sync: self.monitor.sync_status(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::directory::StaticClientDirectory;
    use crate::error::CoreError;
    use crate::monitor::MonitorOptions;
    use crate::session::{ClientInfo, MonitorableSession};
    use crate::storage::MemoryEnvelopeStore;
    use crate::sync::RecordingRepository;

    fn controller(repo: Arc<RecordingRepository>) -> SessionController {
        let monitor = SessionMonitor::new(
            Arc::new(MemoryEnvelopeStore::new()),
            repo,
            Arc::new(SystemClock),
            MonitorOptions::default(),
        );
        let directory = StaticClientDirectory::new([ClientInfo {
            id: "c-1".into(),
            name: "Ana Souza".into(),
            birth_date: chrono::NaiveDate::from_ymd_opt(1990, 4, 2),
            total_sessions: 3,
        }]);
        SessionController::new(Arc::new(monitor), Arc::new(directory))
    }

    fn load(controller: &SessionController, client: &str) {
        let session =
            MonitorableSession::from_calendar("s-1", client, "therapy", "Weekly").unwrap();
        controller.monitor().set_active_session(Some(session)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_shows_type_client_and_elapsed() {
        let mut controller = controller(Arc::new(RecordingRepository::new()));
        load(&controller, "c-1");
        controller.start();
        tokio::time::advance(std::time::Duration::from_secs(65)).await;

        let confirmation = controller.request_finish().unwrap();
        assert_eq!(confirmation.session_type, "therapy");
        assert_eq!(confirmation.client_name, "Ana Souza");
        assert_eq!(confirmation.elapsed_seconds, 65);
        assert_eq!(
            confirmation.to_string(),
            "Finish therapy session with Ana Souza after 00:01:05?"
        );
    }

    #[tokio::test]
    async fn finish_without_confirmation_is_rejected() {
        let repo = Arc::new(RecordingRepository::new());
        let mut controller = controller(Arc::clone(&repo));
        load(&controller, "c-1");
        controller.start();

        let err = controller.confirm_finish("notes").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::ConfirmationRequired)
        ));
        assert_eq!(repo.attempts(), 0);

        controller.request_finish().unwrap();
        controller.cancel_finish();
        assert!(controller.confirm_finish("notes").await.is_err());
    }

    #[tokio::test]
    async fn failed_finish_is_kept_as_last_error() {
        let repo = Arc::new(RecordingRepository::new());
        repo.fail_next(1);
        let mut controller = controller(Arc::clone(&repo));
        load(&controller, "c-1");
        controller.start();

        controller.request_finish().unwrap();
        assert!(controller.confirm_finish("notes").await.is_err());
        assert!(controller.last_error().is_some());
        assert!(controller.panel().to_string().contains("Error:"));

        controller.request_finish().unwrap();
        let event = controller.confirm_finish("notes").await.unwrap();
        assert!(matches!(event, Some(Event::SessionFinished { .. })));
        assert!(controller.last_error().is_none());
        assert!(controller.request_finish().is_none());
    }

    #[tokio::test]
    async fn panel_falls_back_to_client_id() {
        let controller = controller(Arc::new(RecordingRepository::new()));
        assert!(controller.panel().to_string().starts_with("No active session"));

        load(&controller, "c-unknown");
        let panel = controller.panel();
        assert_eq!(panel.client_name.as_deref(), Some("c-unknown"));
        assert_eq!(panel.client_sessions, None);
        assert_eq!(panel.elapsed, "00:00:00");
        let text = panel.to_string();
        assert!(text.contains("Type:     therapy (Weekly)"));
        assert!(text.contains("Client:   c-unknown\n"));
        assert!(text.contains("start:on pause:off"));
    }

    #[tokio::test]
    async fn panel_shows_client_details_from_directory() {
        let controller = controller(Arc::new(RecordingRepository::new()));
        load(&controller, "c-1");

        let panel = controller.panel();
        assert_eq!(panel.client_birth_date, chrono::NaiveDate::from_ymd_opt(1990, 4, 2));
        assert_eq!(panel.client_sessions, Some(3));
        assert!(panel
            .to_string()
            .contains("Client:   Ana Souza (born 1990-04-02, 3 sessions)"));

        let json = serde_json::to_value(&panel).unwrap();
        assert_eq!(json["client_birth_date"], "1990-04-02");
        assert_eq!(json["client_sessions"], 3);
    }
}
