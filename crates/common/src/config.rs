//! Worker configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::{AppError, AppResult};

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// Database configuration.
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Work queue configuration.
    #[validate(nested)]
    pub queue: QueueConfig,
    /// Push gateway configuration.
    #[serde(default)]
    #[validate(nested)]
    pub apns: ApnsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    #[validate(length(min = 1))]
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Work queue configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueueConfig {
    /// Redis connection URL.
    #[validate(length(min = 1))]
    pub url: String,
    /// Name of the main queue. The dead-letter queue is `<queue_name>.dlq`.
    #[serde(default = "default_queue_name")]
    #[validate(length(min = 1))]
    pub queue_name: String,
    /// Maximum number of unacknowledged messages in flight.
    #[serde(default = "default_prefetch_count")]
    #[validate(range(min = 1))]
    pub prefetch_count: u16,
    /// Seconds to wait between reconnection attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    #[validate(range(min = 1))]
    pub reconnect_delay_secs: u64,
    /// Seconds a blocking receive waits before polling again.
    #[serde(default = "default_poll_timeout_secs")]
    #[validate(range(min = 1))]
    pub poll_timeout_secs: u64,
    /// Name of this consumer, used for its in-flight list.
    ///
    /// Must be unique per running worker. Defaults to the host name plus a
    /// random suffix.
    #[serde(default = "default_consumer_name")]
    #[validate(length(min = 1))]
    pub consumer_name: String,
    /// Deliveries of a failing job before it is dead-lettered.
    #[serde(default = "default_max_deliveries")]
    #[validate(range(min = 1))]
    pub max_deliveries: u32,
}

impl QueueConfig {
    /// Delay between reconnection attempts.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Upper bound on a single blocking receive.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Push gateway configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApnsConfig {
    /// Retries after the first attempt for a single device token.
    #[serde(default = "default_max_send_retries")]
    #[validate(range(max = 10))]
    pub max_send_retries: u32,
    /// Timeout for a single push request in seconds.
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            max_send_retries: default_max_send_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApnsConfig {
    /// Timeout for a single push request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_queue_name() -> String {
    "notifications".to_string()
}

const fn default_prefetch_count() -> u16 {
    10
}

const fn default_reconnect_delay_secs() -> u64 {
    5
}

const fn default_poll_timeout_secs() -> u64 {
    1
}

fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

const fn default_max_deliveries() -> u32 {
    3
}

const fn default_max_send_retries() -> u32 {
    3
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `PUSHLAB_ENV`)
    /// 4. Environment variables with `PUSHLAB_` prefix
    pub fn load() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("PUSHLAB_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PUSHLAB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PUSHLAB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    fn finish(config: config::Config) -> AppResult<Self> {
        let config: Self = config.try_deserialize()?;
        config.validate().map_err(AppError::from)?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_applied() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            url = "redis://localhost:6379"
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.queue.queue_name, "notifications");
        assert_eq!(config.queue.prefetch_count, 10);
        assert_eq!(config.queue.max_deliveries, 3);
        assert_eq!(config.queue.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.apns.max_send_retries, 3);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_default_consumer_names_differ() {
        let contents = r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            url = "redis://localhost:6379"
            "#;

        let first = Config::from_file(write_config(contents).path()).unwrap();
        let second = Config::from_file(write_config(contents).path()).unwrap();

        assert!(!first.queue.consumer_name.is_empty());
        assert_ne!(first.queue.consumer_name, second.queue.consumer_name);
    }

    #[test]
    fn test_explicit_consumer_name_kept() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            url = "redis://localhost:6379"
            consumer_name = "worker-a"

            [apns]
            max_send_retries = 5
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.queue.consumer_name, "worker-a");
        assert_eq!(config.apns.max_send_retries, 5);
    }

    #[test]
    fn test_zero_prefetch_rejected() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            url = "redis://localhost:6379"
            prefetch_count = 0
            "#,
        );

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_missing_queue_url_rejected() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            queue_name = "jobs"
            "#,
        );

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_json_log_format() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://localhost/pushlab"

            [queue]
            url = "redis://localhost:6379"

            [logging]
            level = "debug"
            format = "json"
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
