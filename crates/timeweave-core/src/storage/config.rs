//! TOML-based application configuration.
//!
//! Covers:
//! - Scheduler horizon and chunking defaults
//! - Change-queue debounce and polling
//! - Default availability used when a user has none configured
//!
//! Configuration is stored at `~/.config/timeweave/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, Result, ValidationError};
use crate::reschedule::{
    OrchestratorConfig, QueueConfig, DEFAULT_DEBOUNCE_WINDOW_MS, DEFAULT_HORIZON_DAYS,
    DEFAULT_MAX_DEBOUNCE_WAIT_MS, DEFAULT_MAX_PLANS_PER_POLL,
};
use crate::scheduler::{SchedulerConfig, DEFAULT_MIN_CHUNK_MIN};
use crate::timeline::AvailabilityCalendarEntry;

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
    #[serde(default = "default_min_chunk_min")]
    pub default_min_chunk_min: i32,
}

/// Change-queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: i64,
    #[serde(default = "default_max_debounce_wait_ms")]
    pub max_debounce_wait_ms: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_plans_per_poll")]
    pub max_plans_per_poll: usize,
}

/// One recurring weekly slot. `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowTemplate {
    pub day_of_week: u32,
    pub start_min: i32,
    pub end_min: i32,
    #[serde(default)]
    pub is_deep_work: bool,
}

/// Availability fallback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    #[serde(default = "default_windows")]
    pub default_windows: Vec<WindowTemplate>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/timeweave/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Calendar owner the CLI acts for.
    #[serde(default = "default_user_id")]
    pub user_id: i64,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub availability: AvailabilitySettings,
}

// Default functions
fn default_user_id() -> i64 {
    1
}
fn default_horizon_days() -> i64 {
    DEFAULT_HORIZON_DAYS
}
fn default_min_chunk_min() -> i32 {
    DEFAULT_MIN_CHUNK_MIN
}
fn default_debounce_window_ms() -> i64 {
    DEFAULT_DEBOUNCE_WINDOW_MS
}
fn default_max_debounce_wait_ms() -> i64 {
    DEFAULT_MAX_DEBOUNCE_WAIT_MS
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_max_plans_per_poll() -> usize {
    DEFAULT_MAX_PLANS_PER_POLL
}
fn default_windows() -> Vec<WindowTemplate> {
    // Monday to Friday, 09:00-17:00
    (1..=5)
        .map(|day_of_week| WindowTemplate {
            day_of_week,
            start_min: 9 * 60,
            end_min: 17 * 60,
            is_deep_work: false,
        })
        .collect()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            default_min_chunk_min: default_min_chunk_min(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            debounce_window_ms: default_debounce_window_ms(),
            max_debounce_wait_ms: default_max_debounce_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_plans_per_poll: default_max_plans_per_poll(),
        }
    }
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            default_windows: default_windows(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            scheduler: SchedulerSettings::default(),
            queue: QueueSettings::default(),
            availability: AvailabilitySettings::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let unknown = || ConfigError::UnknownKey(key.to_string());

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config file location.
    pub fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if it does not exist.
    ///
    /// Any other read failure is returned and leaves the file alone.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. Does not save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// into the field's type or fails validation.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every leaf key with its value, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.scheduler.horizon_days < 1 {
            return Err(invalid("scheduler.horizon_days", "must be at least 1"));
        }
        if self.scheduler.default_min_chunk_min < 1 {
            return Err(invalid("scheduler.default_min_chunk_min", "must be at least 1"));
        }
        if self.queue.debounce_window_ms < 0 || self.queue.max_debounce_wait_ms < 0 {
            return Err(invalid("queue", "durations must not be negative"));
        }
        for (i, w) in self.availability.default_windows.iter().enumerate() {
            if AvailabilityCalendarEntry::new(self.user_id, w.day_of_week, w.start_min, w.end_min).is_err() {
                return Err(invalid(
                    &format!("availability.default_windows[{i}]"),
                    "day_of_week must be 0..=6 and 0 <= start < end <= 1440",
                ));
            }
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            default_min_chunk_min: self.scheduler.default_min_chunk_min,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            horizon_days: self.scheduler.horizon_days,
            scheduler: self.scheduler_config(),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            debounce_window_ms: self.queue.debounce_window_ms,
            max_debounce_wait_ms: self.queue.max_debounce_wait_ms,
        }
    }

    /// Default availability as calendar entries for `user_id`.
    pub fn default_availability(&self, user_id: i64) -> std::result::Result<Vec<AvailabilityCalendarEntry>, ValidationError> {
        self.availability
            .default_windows
            .iter()
            .map(|w| {
                AvailabilityCalendarEntry::new(user_id, w.day_of_week, w.start_min, w.end_min)
                    .map(|e| e.deep_work(w.is_deep_work))
            })
            .collect()
    }
}
