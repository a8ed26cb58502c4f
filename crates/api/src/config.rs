//! Server configuration, read from the environment at startup.

use labstore_infra::config::{ConfigError, QueueConfig};

pub const BIND_VAR: &str = "LABSTORE_BIND";
pub const JWT_SECRET_VAR: &str = "JWT_SECRET";
pub const PERSISTENT_VAR: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const RUN_REAPER_VAR: &str = "LABSTORE_RUN_REAPER";

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, thiserror::Error)]
pub enum ApiConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
    #[error(transparent)]
    Queue(#[from] ConfigError),
}

/// Which job store backs the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub jwt_secret: String,
    pub store: StoreConfig,
    /// Run the orphan reaper in-process.
    pub run_reaper: bool,
    pub queue: QueueConfig,
}

impl ApiConfig {
    /// In-memory store, no background reaper; orphan scans only run on request.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            jwt_secret: jwt_secret.into(),
            store: StoreConfig::InMemory,
            run_reaper: false,
            queue: QueueConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ApiConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup(JWT_SECRET_VAR).unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let use_persistent = flag(lookup(PERSISTENT_VAR), false);
        let store = if use_persistent {
            let database_url = lookup(DATABASE_URL_VAR).ok_or(ApiConfigError::Missing(DATABASE_URL_VAR))?;
            StoreConfig::Postgres { database_url }
        } else {
            StoreConfig::InMemory
        };

        Ok(Self {
            bind: lookup(BIND_VAR).unwrap_or_else(|| DEFAULT_BIND.to_string()),
            jwt_secret,
            store,
            run_reaper: flag(lookup(RUN_REAPER_VAR), true),
            queue: QueueConfig::from_lookup(&lookup)?,
        })
    }
}

impl core::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind", &self.bind)
            .field("jwt_secret", &"<redacted>")
            .field(
                "store",
                &match self.store {
                    StoreConfig::InMemory => "in_memory",
                    StoreConfig::Postgres { .. } => "postgres",
                },
            )
            .field("run_reaper", &self.run_reaper)
            .field("queue", &self.queue)
            .finish()
    }
}

fn flag(value: Option<String>, default: bool) -> bool {
    value
        .and_then(|v| v.trim().to_ascii_lowercase().parse::<bool>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory_with_reaper() {
        let config = ApiConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.jwt_secret, "dev-secret");
        assert_eq!(config.store, StoreConfig::InMemory);
        assert!(config.run_reaper);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn persistent_store_requires_database_url() {
        let err = ApiConfig::from_lookup(lookup_from(&[(PERSISTENT_VAR, "true")])).unwrap_err();
        assert!(matches!(err, ApiConfigError::Missing(DATABASE_URL_VAR)));

        let config = ApiConfig::from_lookup(lookup_from(&[
            (PERSISTENT_VAR, "TRUE"),
            (DATABASE_URL_VAR, "postgres://localhost/labstore"),
        ]))
        .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                database_url: "postgres://localhost/labstore".to_string()
            }
        );
    }

    #[test]
    fn queue_settings_come_from_the_same_lookup() {
        let config = ApiConfig::from_lookup(lookup_from(&[
            ("LABSTORE_ORPHAN_TIMEOUT_SECS", "30"),
            (RUN_REAPER_VAR, "false"),
        ]))
        .unwrap();
        assert_eq!(config.queue.orphan_timeout, Duration::from_secs(30));
        assert!(!config.run_reaper);
    }

    #[test]
    fn debug_output_hides_secret() {
        let rendered = format!("{:?}", ApiConfig::in_memory("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }
}
