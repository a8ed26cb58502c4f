//! Queue configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub const MAX_ATTEMPTS_VAR: &str = "LABSTORE_MAX_ATTEMPTS";
pub const ORPHAN_TIMEOUT_VAR: &str = "LABSTORE_ORPHAN_TIMEOUT_SECS";
pub const MAX_ORPHANS_PER_SCAN_VAR: &str = "LABSTORE_MAX_ORPHANS_PER_SCAN";
pub const SCAN_INTERVAL_VAR: &str = "LABSTORE_SCAN_INTERVAL_SECS";

/// Longest accepted orphan timeout (100 Julian years).
pub const MAX_ORPHAN_TIMEOUT: Duration = Duration::from_secs(100 * 31_557_600);

/// Tunables for the job queue and the orphan reaper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempt ceiling for automatic retries.
    pub max_attempts: u32,
    /// A running job whose heartbeat is older than this is an orphan.
    #[serde(with = "secs")]
    pub orphan_timeout: Duration,
    /// Upper bound on jobs reclaimed by a single scan.
    pub max_orphans_per_scan: u32,
    #[serde(with = "secs")]
    pub scan_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            orphan_timeout: Duration::from_secs(100),
            max_orphans_per_scan: 1000,
            scan_interval: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Load from process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(MAX_ATTEMPTS_VAR) {
            config.max_attempts = parse_number(MAX_ATTEMPTS_VAR, &v)?;
        }
        if let Some(v) = lookup(ORPHAN_TIMEOUT_VAR) {
            config.orphan_timeout = Duration::from_secs(parse_number(ORPHAN_TIMEOUT_VAR, &v)?);
        }
        if let Some(v) = lookup(MAX_ORPHANS_PER_SCAN_VAR) {
            config.max_orphans_per_scan = parse_number(MAX_ORPHANS_PER_SCAN_VAR, &v)?;
        }
        if let Some(v) = lookup(SCAN_INTERVAL_VAR) {
            config.scan_interval = Duration::from_secs(parse_number(SCAN_INTERVAL_VAR, &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orphan_timeout.is_zero() {
            return Err(invalid(ORPHAN_TIMEOUT_VAR, "0", "must be positive"));
        }
        if self.max_orphans_per_scan == 0 {
            return Err(invalid(MAX_ORPHANS_PER_SCAN_VAR, "0", "must be positive"));
        }
        if self.scan_interval.is_zero() {
            return Err(invalid(SCAN_INTERVAL_VAR, "0", "must be positive"));
        }
        if self.orphan_timeout > MAX_ORPHAN_TIMEOUT {
            return Err(invalid(
                ORPHAN_TIMEOUT_VAR,
                &self.orphan_timeout.as_secs().to_string(),
                "must not exceed 100 years",
            ));
        }
        Ok(())
    }

    /// Orphan timeout as a wall-clock offset.
    pub fn orphan_cutoff_offset(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.orphan_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
