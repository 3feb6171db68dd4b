//! Remote session synchronization.
//!
//! The local timer is the source of truth; the remote repository is
//! eventually consistent and only ever receives best-effort progress writes
//! plus one awaited closing write per session.

pub mod http;
pub mod repository;
pub mod scheduler;
pub mod types;

pub use http::HttpSessionRepository;
pub use repository::{RecordedWrite, RecordingRepository, SessionRepository};
pub use scheduler::spawn_periodic;
pub use types::{SyncError, SyncStatus};
