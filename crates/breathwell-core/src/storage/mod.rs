mod config;
pub mod database;
pub mod migrations;
mod record;

pub use config::{BiometricsConfig, Config, DeviceConfig, SessionConfig, SyncConfig};
pub use database::{InsertOutcome, SessionFilter, SessionStore, DEFAULT_DEDUP_TOLERANCE};
pub use record::{DeviceKind, SessionRecord};

use std::path::PathBuf;

/// Returns `~/.config/breathwell[-dev]/` based on BREATHWELL_ENV.
///
/// Set BREATHWELL_ENV=dev to use a separate development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("BREATHWELL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("breathwell-dev")
    } else {
        base_dir.join("breathwell")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
