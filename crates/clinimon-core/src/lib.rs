//! # Clinimon Core Library
//!
//! This library provides the session monitoring timer used while a clinician
//! is in an encounter with a client. It tracks elapsed time for the single
//! active session, survives process restarts without losing or
//! double-counting time, flushes progress to a remote repository and closes
//! the session exactly once. The `clinimon` CLI and any desktop shell are thin
//! layers over this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A pure state machine over one session; the caller
//!   passes the current instant into every command
//! - **Reconciliation**: Credits wall-clock time that passed while no process
//!   held the session
//! - **Storage**: SQLite `kv` table holding the persisted envelope, TOML
//!   configuration
//! - **Sync**: Remote session repository (HTTP or local SQLite) and the
//!   cancellable periodic tasks
//! - **Monitor**: The runtime that ties the above together around a single
//!   active-session slot
//!
//! ## Key Components
//!
//! - [`SessionMonitor`]: Owns the active session and its periodic tasks
//! - [`TimerEngine`]: Core timer state machine
//! - [`SessionController`]: Headless view-model for front ends
//! - [`Database`]: Envelope and local session persistence
//! - [`Config`]: Application configuration management

pub mod clock;
pub mod directory;
pub mod error;
pub mod events;
pub mod monitor;
pub mod session;
pub mod storage;
pub mod sync;
pub mod timer;
pub mod ui;

pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{ClientDirectory, StaticClientDirectory};
pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::Event;
pub use monitor::{MonitorOptions, SessionMonitor};
pub use session::{ClientInfo, MonitorableSession, SessionSource, SessionStatus, SessionUpdate};
pub use storage::{Config, Database, Envelope, EnvelopeStore, MemoryEnvelopeStore, TimerSnapshot};
pub use sync::{
    HttpSessionRepository, RecordingRepository, SessionRepository, SyncError, SyncStatus,
};
pub use timer::{TimerEngine, TimerState, TimerView};
pub use ui::{format_hms, ControlGates, FinishConfirmation, Panel, SessionController};
