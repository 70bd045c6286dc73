//! Configuration for the sync engine.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Timing and cadence knobs of the sync pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period before queued operations are sent as one batch
    pub outgoing_debounce: Duration,
    /// Window collecting incoming operations before they are ordered
    pub incoming_debounce: Duration,
    /// Window merging `UPDATE_PROP` edits to the same entity
    pub prop_debounce: Duration,
    /// Upper bound on a single send; the in-flight batch is released after it
    pub safety_timeout: Duration,
    /// Retries allowed before a queued operation is discarded
    pub max_retries: u32,
    /// Applied operations between two full snapshots
    pub snapshot_every: u64,
    /// Minimum spacing of reconnect catch-ups
    pub reconnect_throttle: Duration,
    /// Committed local operations between two backup reminders
    pub backup_every: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outgoing_debounce: Duration::from_millis(300),
            incoming_debounce: Duration::from_millis(150),
            prop_debounce: Duration::from_millis(1500),
            safety_timeout: Duration::from_secs(15),
            max_retries: 5,
            snapshot_every: 50,
            reconnect_throttle: Duration::from_secs(5),
            backup_every: 100,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Load configuration from `LINEAGE_*` environment variables, reading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            outgoing_debounce: millis(&lookup, "LINEAGE_OUTGOING_DEBOUNCE_MS", defaults.outgoing_debounce)?,
            incoming_debounce: millis(&lookup, "LINEAGE_INCOMING_DEBOUNCE_MS", defaults.incoming_debounce)?,
            prop_debounce: millis(&lookup, "LINEAGE_PROP_DEBOUNCE_MS", defaults.prop_debounce)?,
            safety_timeout: millis(&lookup, "LINEAGE_SAFETY_TIMEOUT_MS", defaults.safety_timeout)?,
            max_retries: number(&lookup, "LINEAGE_MAX_RETRIES", defaults.max_retries)?,
            snapshot_every: number(&lookup, "LINEAGE_SNAPSHOT_EVERY", defaults.snapshot_every)?,
            reconnect_throttle: millis(&lookup, "LINEAGE_RECONNECT_THROTTLE_MS", defaults.reconnect_throttle)?,
            backup_every: number(&lookup, "LINEAGE_BACKUP_EVERY", defaults.backup_every)?,
            event_capacity: number(&lookup, "LINEAGE_EVENT_CAPACITY", defaults.event_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with. Cadences and the event
    /// channel capacity must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_every == 0 {
            return Err(ConfigError::Zero("LINEAGE_SNAPSHOT_EVERY"));
        }
        if self.backup_every == 0 {
            return Err(ConfigError::Zero("LINEAGE_BACKUP_EVERY"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("LINEAGE_EVENT_CAPACITY"));
        }
        Ok(())
    }
}

fn number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    number(lookup, name, default_ms).map(Duration::from_millis)
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name} value: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
