mod config;
pub mod migrations;
mod schedule_db;

pub use config::{AvailabilitySettings, Config, QueueSettings, SchedulerSettings, WindowTemplate};
pub use schedule_db::ScheduleDb;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/timeweave[-dev]/` based on TIMEWEAVE_ENV.
///
/// Set TIMEWEAVE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TIMEWEAVE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("timeweave-dev")
    } else {
        base_dir.join("timeweave")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
