//! Sync engine configuration
//!
//! Provides [`SyncConfig`], its builder, and loading from a TOML file with
//! environment overrides.
//!
//! ```toml
//! server_url = "https://example.supabase.co"
//! api_key = "anon-key"
//! max_attempts = 3
//! drain_interval_secs = 30
//! retention_days = 7
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:54321";

const ENV_SERVER_URL: &str = "PRAYERSYNC_SERVER_URL";
const ENV_API_KEY: &str = "PRAYERSYNC_API_KEY";
const ENV_DB_PATH: &str = "PRAYERSYNC_DB_PATH";

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Backend base URL
    pub server_url: String,
    /// API key sent with every remote call
    pub api_key: Option<String>,
    /// Location of the local SQLite database
    pub database_path: PathBuf,
    /// Attempts before an action is reported as permanently failed
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub base_delay: Duration,
    /// Backoff cap for direct network retries
    pub direct_max_delay: Duration,
    /// Backoff cap between durable queue attempts
    pub queue_max_delay: Duration,
    /// Periodic drain interval while online
    pub drain_interval: Duration,
    /// Age after which exhausted actions are discarded
    pub retention: Duration,
    /// Number of deleted ids remembered to suppress late notifications
    pub tombstone_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: None,
            database_path: default_database_path(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            direct_max_delay: Duration::from_secs(5),
            queue_max_delay: Duration::from_secs(60),
            drain_interval: Duration::from_secs(30),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            tombstone_capacity: 256,
        }
    }
}

/// Platform data directory location of the local database
fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("prayersync");
    path.push("local.db");
    path
}

/// On-disk shape of the config file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    server_url: Option<String>,
    api_key: Option<String>,
    database_path: Option<PathBuf>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    direct_max_delay_ms: Option<u64>,
    queue_max_delay_secs: Option<u64>,
    drain_interval_secs: Option<u64>,
    retention_days: Option<u64>,
    tombstone_capacity: Option<usize>,
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load from a TOML file (if it exists), then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
            toml::from_str::<ConfigFile>(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            tracing::debug!("[Config] {} not found, using defaults", path.display());
            ConfigFile::default()
        };

        let mut builder = Self::builder().apply_file(file);
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            builder = builder.server_url(url);
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            builder = builder.api_key(key);
        }
        if let Ok(db) = std::env::var(ENV_DB_PATH) {
            builder = builder.database_path(db);
        }
        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("max_attempts must be at least 1"));
        }
        if self.direct_max_delay < self.base_delay || self.queue_max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue(
                "max delays must not be below base_delay",
            ));
        }
        if self.tombstone_capacity == 0 {
            return Err(ConfigError::InvalidValue("tombstone_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Get the full URL for an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: Option<SyncConfig>,
}

impl SyncConfigBuilder {
    fn config(&mut self) -> &mut SyncConfig {
        self.config.get_or_insert_with(SyncConfig::default)
    }

    fn apply_file(mut self, file: ConfigFile) -> Self {
        let config = self.config();
        if let Some(url) = file.server_url {
            config.server_url = url;
        }
        if file.api_key.is_some() {
            config.api_key = file.api_key;
        }
        if let Some(path) = file.database_path {
            config.database_path = path;
        }
        if let Some(max) = file.max_attempts {
            config.max_attempts = max;
        }
        if let Some(ms) = file.base_delay_ms {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.direct_max_delay_ms {
            config.direct_max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.queue_max_delay_secs {
            config.queue_max_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = file.drain_interval_secs {
            config.drain_interval = Duration::from_secs(secs);
        }
        if let Some(days) = file.retention_days {
            config.retention = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(capacity) = file.tombstone_capacity {
            config.tombstone_capacity = capacity;
        }
        self
    }

    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config().server_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config().api_key = Some(key.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().database_path = path.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config().max_attempts = max_attempts;
        self
    }

    /// Set base delay and both caps at once
    pub fn backoff(mut self, base: Duration, direct_max: Duration, queue_max: Duration) -> Self {
        let config = self.config();
        config.base_delay = base;
        config.direct_max_delay = direct_max;
        config.queue_max_delay = queue_max;
        self
    }

    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config().drain_interval = interval;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config().retention = retention;
        self
    }

    pub fn tombstone_capacity(mut self, capacity: usize) -> Self {
        self.config().tombstone_capacity = capacity;
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> Result<SyncConfig, ConfigError> {
        let config = self.config().clone();
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("could not read config: {0}")]
    Io(String),
    #[error("could not parse config: {0}")]
    Parse(String),
}
