//! TOML-based engine configuration.
//!
//! Stores the tunables for streak computation, caching and the offline
//! queue as typed, immutable sections. Every constructor path runs
//! [`EngineConfig::validate`], so an `EngineConfig` in hand is always a
//! usable one.
//!
//! Configuration is stored at `~/.config/bloom/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Streak-calculator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// Bounded history window fed into the calculator, in days.
    #[serde(default = "default_history_window_days")]
    pub history_window_days: u32,
    /// Offset from UTC used to truncate event timestamps to local days.
    #[serde(default)]
    pub timezone_offset_hours: i32,
}

/// Streak-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
}

/// Offline queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts before a mutation moves to the dead-letter record.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for the first retry.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Ceiling for the exponential backoff delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Pending-mutation cap before the overflow policy kicks in.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// How many users may be flushed concurrently.
    #[serde(default = "default_flush_concurrency")]
    pub flush_concurrency: usize,
    /// Per-call timeout for remote writes during a flush.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/bloom/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub calculator: CalculatorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

// Default functions
fn default_history_window_days() -> u32 {
    365
}
fn default_ttl_minutes() -> u32 {
    30
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_backoff_secs() -> u64 {
    30
}
fn default_backoff_cap_secs() -> u64 {
    900
}
fn default_max_pending() -> usize {
    500
}
fn default_flush_concurrency() -> usize {
    4
}
fn default_call_timeout_secs() -> u64 {
    10
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            history_window_days: default_history_window_days(),
            timezone_offset_hours: 0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            max_pending: default_max_pending(),
            flush_concurrency: default_flush_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calculator: CalculatorConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Returns `~/.config/bloom[-dev]/` based on BLOOM_ENV.
///
/// Set BLOOM_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("BLOOM_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("bloom-dev")
    } else {
        base_dir.join("bloom")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl EngineConfig {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/bloom"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or return (and persist) the validated default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// fails validation, or the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        let cfg = match std::fs::read_to_string(&path) {
            Ok(content) => {
                toml::from_str::<EngineConfig>(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                cfg
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Check every section for usable values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calculator.history_window_days == 0 {
            return Err(invalid(
                "calculator.history_window_days",
                "must be at least 1",
            ));
        }
        if !(-12..=14).contains(&self.calculator.timezone_offset_hours) {
            return Err(invalid(
                "calculator.timezone_offset_hours",
                "must be between -12 and +14",
            ));
        }
        if self.cache.ttl_minutes == 0 {
            return Err(invalid("cache.ttl_minutes", "must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(invalid("queue.max_attempts", "must be at least 1"));
        }
        if self.queue.backoff_cap_secs < self.queue.base_backoff_secs {
            return Err(invalid(
                "queue.backoff_cap_secs",
                "must not be below queue.base_backoff_secs",
            ));
        }
        if self.queue.flush_concurrency == 0 {
            return Err(invalid("queue.flush_concurrency", "must be at least 1"));
        }
        if self.queue.call_timeout_secs == 0 {
            return Err(invalid("queue.call_timeout_secs", "must be at least 1"));
        }
        if self.queue.max_pending == 0 {
            return Err(invalid("queue.max_pending", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
