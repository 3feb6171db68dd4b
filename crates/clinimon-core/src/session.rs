//! Monitored session model shared by the engine, the envelope and the
//! remote repository.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Where a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Calendar,
    Manual,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Calendar => "calendar",
            SessionSource::Manual => "manual",
        }
    }
}

impl std::str::FromStr for SessionSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(SessionSource::Calendar),
            "manual" => Ok(SessionSource::Manual),
            other => Err(ValidationError::InvalidValue {
                field: "source".into(),
                message: format!("expected 'calendar' or 'manual', got '{other}'"),
            }),
        }
    }
}

/// Persisted session status. Only ever moves forward into `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    NotStarted,
    Running,
    Paused,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not-started",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not-started" => Some(SessionStatus::NotStarted),
            "running" => Some(SessionStatus::Running),
            "paused" => Some(SessionStatus::Paused),
            "finished" => Some(SessionStatus::Finished),
            _ => None,
        }
    }
}

/// One clinical monitoring encounter between a clinician and a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorableSession {
    pub id: String,
    pub client_id: String,
    pub session_type: String,
    pub source: SessionSource,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub elapsed_seconds: u64,
    pub status: SessionStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl MonitorableSession {
    /// A fresh, never-started session typed in by the clinician.
    pub fn manual(
        client_id: impl Into<String>,
        session_type: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            uuid::Uuid::new_v4().to_string(),
            client_id.into(),
            session_type.into(),
            SessionSource::Manual,
            String::new(),
        )
    }

    /// A session imported from an appointment in the calendar.
    pub fn from_calendar(
        id: impl Into<String>,
        client_id: impl Into<String>,
        session_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            id.into(),
            client_id.into(),
            session_type.into(),
            SessionSource::Calendar,
            title.into(),
        )
    }

    fn build(
        id: String,
        client_id: String,
        session_type: String,
        source: SessionSource,
        title: String,
    ) -> Result<Self, ValidationError> {
        let required = [
            ("id", &id),
            ("client_id", &client_id),
            ("session_type", &session_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field.into()));
            }
        }
        Ok(Self {
            id,
            client_id,
            session_type,
            source,
            title,
            notes: String::new(),
            elapsed_seconds: 0,
            status: SessionStatus::NotStarted,
            started_at: None,
            ended_at: None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    pub fn has_started(&self) -> bool {
        self.status != SessionStatus::NotStarted
    }
}

/// Partial update sent to the remote session repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    /// Progress flush: only the elapsed counter.
    pub fn progress(elapsed_seconds: u64) -> Self {
        Self {
            elapsed_seconds: Some(elapsed_seconds),
            ..Self::default()
        }
    }

    /// The closing write issued by `finish`.
    pub fn finish(elapsed_seconds: u64, notes: String, ended_at: DateTime<Utc>) -> Self {
        Self {
            elapsed_seconds: Some(elapsed_seconds),
            notes: Some(notes),
            status: Some(SessionStatus::Finished),
            ended_at: Some(ended_at),
        }
    }
}

/// Read-only client identity supplied by the client directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub total_sessions: u32,
}
