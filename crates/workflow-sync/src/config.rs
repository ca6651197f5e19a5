//! Synchronization settings.

use crate::conflict::ConflictResolution;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by the sync manager and every sync handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// How often pending changes are re-synced in the background
    #[serde(with = "millis")]
    pub auto_sync_interval: Duration,
    pub auto_sync_enabled: bool,
    pub default_conflict_resolution: ConflictResolution,
    /// Upper bound for one sync attempt
    #[serde(with = "millis")]
    pub sync_timeout: Duration,
    /// Retries after a failed attempt (0 = single attempt)
    pub max_retries: u32,
    /// Quiet period collapsing bursts of document changes
    #[serde(with = "millis")]
    pub debounce_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: Duration::from_millis(500),
            auto_sync_enabled: true,
            default_conflict_resolution: ConflictResolution::UseRemote,
            sync_timeout: Duration::from_millis(5000),
            max_retries: 3,
            debounce_delay: Duration::from_millis(250),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `WORKFLOW_SYNC_*` environment variables.
    ///
    /// Recognized variables:
    /// - `WORKFLOW_SYNC_AUTO_SYNC_INTERVAL_MS`
    /// - `WORKFLOW_SYNC_AUTO_SYNC_ENABLED` (`true`/`false`)
    /// - `WORKFLOW_SYNC_CONFLICT_RESOLUTION` (`use_local`, `use_remote`, `manual`)
    /// - `WORKFLOW_SYNC_TIMEOUT_MS`
    /// - `WORKFLOW_SYNC_MAX_RETRIES`
    /// - `WORKFLOW_SYNC_DEBOUNCE_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, "WORKFLOW_SYNC_AUTO_SYNC_INTERVAL_MS")? {
            config.auto_sync_interval = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var(&lookup, "WORKFLOW_SYNC_AUTO_SYNC_ENABLED")? {
            config.auto_sync_enabled = enabled;
        }
        if let Some(raw) = lookup("WORKFLOW_SYNC_CONFLICT_RESOLUTION") {
            config.default_conflict_resolution = match raw.trim() {
                "use_local" => ConflictResolution::UseLocal,
                "use_remote" => ConflictResolution::UseRemote,
                "manual" => ConflictResolution::Manual,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "WORKFLOW_SYNC_CONFLICT_RESOLUTION",
                        value: raw,
                    });
                }
            };
        }
        if let Some(ms) = parse_var(&lookup, "WORKFLOW_SYNC_TIMEOUT_MS")? {
            config.sync_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, "WORKFLOW_SYNC_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_var(&lookup, "WORKFLOW_SYNC_DEBOUNCE_MS")? {
            config.debounce_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
