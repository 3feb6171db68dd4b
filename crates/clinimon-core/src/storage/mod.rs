mod config;
pub mod database;
pub mod envelope;

pub use config::{Config, RemoteConfig, StorageConfig, TimerConfig};
pub use database::Database;
pub use envelope::{
    clear_envelope, read_envelope, write_envelope, Envelope, EnvelopeStore, MemoryEnvelopeStore,
    TimerSnapshot, DEFAULT_ENVELOPE_KEY,
};

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Returns the data directory, creating it if needed.
///
/// `CLINIMON_DATA_DIR` wins when set. Otherwise `~/.config/clinimon[-dev]/`
/// based on `CLINIMON_ENV` (set `CLINIMON_ENV=dev` for the development
/// directory).
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("CLINIMON_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(".config");
            let env = std::env::var("CLINIMON_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("clinimon-dev")
            } else {
                base_dir.join("clinimon")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
