//! TOML-based application configuration.
//!
//! Stores:
//! - Scheduler timing (watcher poll interval, timer tick interval)
//! - Event channel sizing and auto-start behaviour
//! - Defaults used when a session is created without explicit cycle settings
//!
//! Configuration is stored at `~/.config/studyroom/config.toml` and read once
//! at startup; changes take effect the next time the scheduler is built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::{ConfigError, Result};

/// Timing and delivery settings for the scheduler runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-time polls. Schedules are specified to the minute.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds per countdown tick.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Start a session's cycles as soon as it becomes due.
    #[serde(default)]
    pub auto_start_due: bool,
}

/// Values used by `session add` when flags are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_cycle_duration_secs")]
    pub cycle_duration_secs: u64,
    #[serde(default = "default_total_cycles")]
    pub total_cycles: u32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/studyroom/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub defaults: SessionDefaults,
}

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_tick_interval_secs() -> u64 {
    1
}
fn default_event_buffer() -> usize {
    256
}
fn default_cycle_duration_secs() -> u64 {
    25 * 60
}
fn default_total_cycles() -> u32 {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            event_buffer: default_event_buffer(),
            auto_start_due: false,
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            cycle_duration_secs: default_cycle_duration_secs(),
            total_cycles: default_total_cycles(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Both intervals and the event buffer must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive(&[
            ("scheduler.poll_interval_secs", self.poll_interval_secs == 0),
            ("scheduler.tick_interval_secs", self.tick_interval_secs == 0),
            ("scheduler.event_buffer", self.event_buffer == 0),
        ])
    }
}

fn ensure_positive(checks: &[(&str, bool)]) -> Result<(), ConfigError> {
    match checks.iter().find(|(_, is_zero)| *is_zero) {
        Some((key, _)) => Err(ConfigError::InvalidValue {
            key: (*key).to_string(),
            message: "must be greater than 0".into(),
        }),
        None => Ok(()),
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
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("expected true or false, got '{value}'")))?,
                    ),
                    serde_json::Value::Number(_) => serde_json::Value::Number(
                        value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("expected a whole number, got '{value}'")))?
                            .into(),
                    ),
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot replace a whole section".into()));
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

    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        ensure_positive(&[
            ("defaults.cycle_duration_secs", self.defaults.cycle_duration_secs == 0),
            ("defaults.total_cycles", self.defaults.total_cycles == 0),
        ])
    }

    /// Load from the data directory, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

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
            Err(e) => Err(e.into()),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key, in memory only. Call `save` to persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value does not parse as
    /// the key's type, or the result fails validation.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_default_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.poll_interval_secs, 60);
        assert_eq!(cfg.scheduler.tick_interval_secs, 1);
        assert_eq!(cfg.scheduler.event_buffer, 256);
        assert!(!cfg.scheduler.auto_start_due);
        assert_eq!(cfg.defaults.cycle_duration_secs, 1500);
        assert_eq!(cfg.defaults.total_cycles, 4);
        assert_eq!(cfg.scheduler.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[scheduler]\npoll_interval_secs = 30\n").unwrap();
        assert_eq!(cfg.scheduler.poll_interval_secs, 30);
        assert_eq!(cfg.scheduler.tick_interval_secs, 1);
        assert_eq!(cfg.defaults.total_cycles, 4);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("scheduler.poll_interval_secs").as_deref(), Some("60"));
        assert_eq!(cfg.get("scheduler.auto_start_due").as_deref(), Some("false"));
        assert!(cfg.get("scheduler").is_none());
        assert!(cfg.get("scheduler.missing_key").is_none());
    }

    #[test]
    fn set_updates_number_and_bool() {
        let mut cfg = Config::default();
        cfg.set("scheduler.tick_interval_secs", "2").unwrap();
        cfg.set("scheduler.auto_start_due", "true").unwrap();
        assert_eq!(cfg.scheduler.tick_interval_secs, 2);
        assert!(cfg.scheduler.auto_start_due);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(cfg.set("scheduler.nonexistent", "1").is_err());
        assert!(cfg.set("", "1").is_err());
    }

    #[test]
    fn set_rejects_invalid_type_and_zero() {
        let mut cfg = Config::default();
        assert!(cfg.set("scheduler.auto_start_due", "maybe").is_err());
        assert!(cfg.set("scheduler.poll_interval_secs", "soon").is_err());
        assert!(cfg.set("scheduler.poll_interval_secs", "0").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_writes_defaults_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg, Config::default());

        let mut changed = cfg.clone();
        changed.set("defaults.total_cycles", "6").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().defaults.total_cycles, 6);
    }

    #[test]
    fn scheduler_config_rejects_zero_intervals() {
        assert!(SchedulerConfig::default().validate().is_ok());
        let zero_tick = SchedulerConfig {
            tick_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            zero_tick.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "scheduler.tick_interval_secs"
        ));
        let zero_poll = SchedulerConfig {
            poll_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn load_from_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\ntick_interval_secs = 0\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert_eq!(err.code(), "config");
    }
}
