//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Session length and preparation countdown
//! - Haptic and display toggles
//! - Which device this installation runs on
//! - Biometric query timing
//! - Peer sync tolerances and retry backoff
//!
//! Configuration is stored at `~/.config/breathwell/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{data_dir, DeviceKind};
use crate::biometrics::BiometricSettings;
use crate::error::ConfigError;
use crate::session::{DEFAULT_COUNTDOWN, DEFAULT_CYCLES, MAX_CYCLES, MIN_CYCLES};
use crate::sync::RetryPolicy;

/// Ceiling for the millisecond settings: settle delay, query timeout and
/// dedup tolerance.
const MAX_DELAY_MS: u64 = 60_000;
const MAX_BASELINE_WINDOW_HOURS: u64 = 30 * 24;
const MAX_RETRY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_total_cycles")]
    pub total_cycles: u32,
    #[serde(default = "default_true")]
    pub haptics_enabled: bool,
    #[serde(default = "default_true")]
    pub keep_display_awake: bool,
    #[serde(default = "default_preparation_secs")]
    pub preparation_secs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: DeviceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricsConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_baseline_window_hours")]
    pub baseline_window_hours: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_dedup_tolerance_ms")]
    pub dedup_tolerance_ms: u64,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
    /// Directory shared with the paired device. Sync is local-only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dir: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub biometrics: BiometricsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_total_cycles() -> u32 {
    DEFAULT_CYCLES
}
fn default_true() -> bool {
    true
}
fn default_preparation_secs() -> u32 {
    DEFAULT_COUNTDOWN
}
fn default_settle_delay_ms() -> u64 {
    2_000
}
fn default_baseline_window_hours() -> u64 {
    24
}
fn default_query_timeout_ms() -> u64 {
    5_000
}
fn default_dedup_tolerance_ms() -> u64 {
    500
}
fn default_retry_base_secs() -> u64 {
    5
}
fn default_retry_max_secs() -> u64 {
    600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            total_cycles: default_total_cycles(),
            haptics_enabled: true,
            keep_display_awake: true,
            preparation_secs: default_preparation_secs(),
        }
    }
}

impl Default for BiometricsConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            baseline_window_hours: default_baseline_window_hours(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance_ms: default_dedup_tolerance_ms(),
            retry_base_secs: default_retry_base_secs(),
            retry_max_secs: default_retry_max_secs(),
            peer_dir: None,
        }
    }
}

impl BiometricsConfig {
    pub fn settings(&self) -> BiometricSettings {
        BiometricSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            baseline_window: Duration::from_secs(self.baseline_window_hours.saturating_mul(60 * 60)),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
        }
    }
}

impl SyncConfig {
    pub fn dedup_tolerance(&self) -> Duration {
        Duration::from_millis(self.dedup_tolerance_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_base_secs),
            Duration::from_secs(self.retry_max_secs),
        )
    }
}

impl Config {
    fn get_json_value_by_path<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(root: &mut Value, key: &str, value: &str) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let new_value = match obj.get(part) {
                Some(Value::Bool(_)) => Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|_| invalid(format!("'{value}' is not true or false")))?,
                ),
                Some(Value::Number(_)) => Value::Number(
                    value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("'{value}' is not a whole number")))?
                        .into(),
                ),
                Some(Value::Object(_)) | Some(Value::Array(_)) => {
                    return Err(invalid("cannot set a whole section".into()));
                }
                Some(_) => Value::String(value.into()),
                // Optional keys are absent from the serialized form until set.
                None if key == "sync.peer_dir" => Value::String(value.into()),
                None => return Err(unknown()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// `~/.config/breathwell[-dev]/config.toml`
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("~/.config/breathwell"),
                message: e.to_string(),
            })
    }

    /// Load from the default path, writing defaults there on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning defaults on any error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("using default config: {e}");
            Self::default()
        })
    }

    /// Get a config value as a string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key. The change is validated but not
    /// saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not parse or
    /// falls outside its allowed range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |key: &str, message: String| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            })
        };

        if !(MIN_CYCLES..=MAX_CYCLES).contains(&self.session.total_cycles) {
            return out_of_range(
                "session.total_cycles",
                format!("must be between {MIN_CYCLES} and {MAX_CYCLES}"),
            );
        }
        if self.session.preparation_secs > 60 {
            return out_of_range("session.preparation_secs", "must be at most 60".into());
        }
        if self.biometrics.settle_delay_ms > MAX_DELAY_MS {
            return out_of_range(
                "biometrics.settle_delay_ms",
                format!("must be at most {MAX_DELAY_MS}"),
            );
        }
        if !(1..=MAX_DELAY_MS).contains(&self.biometrics.query_timeout_ms) {
            return out_of_range(
                "biometrics.query_timeout_ms",
                format!("must be between 1 and {MAX_DELAY_MS}"),
            );
        }
        if !(1..=MAX_BASELINE_WINDOW_HOURS).contains(&self.biometrics.baseline_window_hours) {
            return out_of_range(
                "biometrics.baseline_window_hours",
                format!("must be between 1 and {MAX_BASELINE_WINDOW_HOURS}"),
            );
        }
        if self.sync.dedup_tolerance_ms > MAX_DELAY_MS {
            return out_of_range(
                "sync.dedup_tolerance_ms",
                format!("must be at most {MAX_DELAY_MS}"),
            );
        }
        if self.sync.retry_base_secs == 0 {
            return out_of_range("sync.retry_base_secs", "must be positive".into());
        }
        if self.sync.retry_max_secs < self.sync.retry_base_secs {
            return out_of_range(
                "sync.retry_max_secs",
                "must not be below sync.retry_base_secs".into(),
            );
        }
        if self.sync.retry_max_secs > MAX_RETRY_SECS {
            return out_of_range(
                "sync.retry_max_secs",
                format!("must be at most {MAX_RETRY_SECS}"),
            );
        }
        Ok(())
    }
}
