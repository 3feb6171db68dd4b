//! Core types for remote session synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Progress of best-effort writes to the remote repository.
///
/// A failure recorded here is non-fatal: the local timer keeps going and the
/// next scheduled flush retries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last successful write timestamp.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Elapsed seconds carried by the last successful write.
    pub last_synced_seconds: Option<u64>,
    /// Message of the most recent failed write, cleared by the next success.
    pub last_error: Option<String>,
    /// Writes issued but not yet answered.
    pub in_flight: usize,
}

impl SyncStatus {
    pub fn record_success(&mut self, elapsed_seconds: u64, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        self.last_synced_seconds = Some(elapsed_seconds);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn is_degraded(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Remote write errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

impl SyncError {
    /// Whether retrying the same write later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Unavailable(_) => true,
            SyncError::Api { status, .. } => *status == 429 || *status >= 500,
            SyncError::Store(StoreError::Locked) => true,
            _ => false,
        }
    }
}
