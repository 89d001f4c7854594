//! Ingestion configuration
//!
//! Loaded once from the environment (after `.env`), validated, then treated as
//! immutable for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use stormfeed_common::{env, SourceType};

use crate::retry::{BackoffKind, BackoffPolicy};

// ============================================================================
// Defaults
// ============================================================================

/// Default upstream directory holding the daily report files.
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://www.spc.noaa.gov/climo/reports";

/// Default HTTP timeout for a single document fetch, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default number of records per published batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of fetch retries after the first attempt (5xx only).
pub const DEFAULT_FETCH_MAX_RETRIES: u32 = 3;

/// Default base fetch backoff: 30 minutes.
pub const DEFAULT_FETCH_RETRY_BASE_SECS: u64 = 30 * 60;

/// Default total publish attempts per batch.
pub const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 3;

/// Default base publish backoff in milliseconds.
pub const DEFAULT_PUBLISH_RETRY_BASE_MS: u64 = 1_000;

/// Default recurrence of the ingest cycle: hourly.
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 60 * 60;

/// Default per-source task timeout: 4 hours, longer than the default retry horizon.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Default grace period for an in-flight cycle at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BROKER_REST_URL: &str = "http://localhost:8082";
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TOPIC: &str = "storm-reports";
pub const DEFAULT_DLQ_TOPIC: &str = "storm-reports-dlq";
pub const DEFAULT_DLQ_FALLBACK_DIR: &str = "./dlq-fallback";

/// Default advisory size limit for a fallback file: 10 MiB.
pub const DEFAULT_DLQ_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub broker: BrokerConfig,
    pub dead_letter: DeadLetterConfig,
    /// Records per published batch
    pub batch_size: usize,
    pub fetch_retry: FetchRetryConfig,
    pub publish_retry: PublishRetryConfig,
    /// Seconds between the start of consecutive cycles
    pub schedule_interval_secs: u64,
    /// Maximum source tasks in flight at once; 0 means unbounded
    pub max_concurrent_sources: usize,
    /// Per-source fetch timeout in seconds, retries included; publishing is not bounded
    pub task_timeout_secs: u64,
    /// Grace period for the in-flight cycle on shutdown, in seconds
    pub shutdown_timeout_secs: u64,
}

/// Upstream document source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub source_types: Vec<SourceType>,
    pub http_timeout_secs: u64,
}

/// Broker (Kafka REST proxy) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub rest_url: String,
    pub timeout_secs: u64,
    /// Primary destination
    pub topic: String,
}

/// Dead-letter stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub enabled: bool,
    pub topic: String,
    pub fallback_dir: PathBuf,
    /// Advisory; larger files are still written
    pub max_file_bytes: u64,
}

/// Retry policy for 5xx fetch responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_secs: u64,
    pub kind: BackoffKind,
}

/// Retry policy for broker publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_ms: u64,
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let source_types = env::list_or("INGEST_SOURCE_TYPES", &["torn", "hail", "wind"])
            .iter()
            .map(|s| s.parse::<SourceType>())
            .collect::<Result<Vec<_>, _>>()?;

        let fetch_kind = env::string_or("INGEST_FETCH_BACKOFF", "exponential").parse()?;

        let config = Self {
            source: SourceConfig {
                base_url: env::string_or("INGEST_SOURCE_BASE_URL", DEFAULT_SOURCE_BASE_URL),
                source_types,
                http_timeout_secs: env::parse_or(
                    "INGEST_HTTP_TIMEOUT_SECS",
                    DEFAULT_HTTP_TIMEOUT_SECS,
                )?,
            },
            broker: BrokerConfig {
                rest_url: env::string_or("BROKER_REST_URL", DEFAULT_BROKER_REST_URL),
                timeout_secs: env::parse_or("BROKER_TIMEOUT_SECS", DEFAULT_BROKER_TIMEOUT_SECS)?,
                topic: env::string_or("BROKER_TOPIC", DEFAULT_TOPIC),
            },
            dead_letter: DeadLetterConfig {
                enabled: env::parse_or("DLQ_ENABLED", true)?,
                topic: env::string_or("DLQ_TOPIC", DEFAULT_DLQ_TOPIC),
                fallback_dir: PathBuf::from(env::string_or(
                    "DLQ_FALLBACK_DIR",
                    DEFAULT_DLQ_FALLBACK_DIR,
                )),
                max_file_bytes: env::parse_or("DLQ_MAX_FILE_BYTES", DEFAULT_DLQ_MAX_FILE_BYTES)?,
            },
            batch_size: env::parse_or("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            fetch_retry: FetchRetryConfig {
                max_retries: env::parse_or("INGEST_FETCH_MAX_RETRIES", DEFAULT_FETCH_MAX_RETRIES)?,
                base_secs: env::parse_or(
                    "INGEST_FETCH_RETRY_BASE_SECS",
                    DEFAULT_FETCH_RETRY_BASE_SECS,
                )?,
                kind: fetch_kind,
            },
            publish_retry: PublishRetryConfig {
                max_attempts: env::parse_or(
                    "INGEST_PUBLISH_MAX_ATTEMPTS",
                    DEFAULT_PUBLISH_MAX_ATTEMPTS,
                )?,
                base_ms: env::parse_or(
                    "INGEST_PUBLISH_RETRY_BASE_MS",
                    DEFAULT_PUBLISH_RETRY_BASE_MS,
                )?,
            },
            schedule_interval_secs: env::parse_or(
                "INGEST_SCHEDULE_INTERVAL_SECS",
                DEFAULT_SCHEDULE_INTERVAL_SECS,
            )?,
            max_concurrent_sources: env::parse_or("INGEST_MAX_CONCURRENT_SOURCES", 0)?,
            task_timeout_secs: env::parse_or("INGEST_TASK_TIMEOUT_SECS", DEFAULT_TASK_TIMEOUT_SECS)?,
            shutdown_timeout_secs: env::parse_or(
                "INGEST_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.base_url.is_empty() {
            anyhow::bail!("INGEST_SOURCE_BASE_URL cannot be empty");
        }
        if self.source.source_types.is_empty() {
            anyhow::bail!("INGEST_SOURCE_TYPES must name at least one source type");
        }
        if self.source.http_timeout_secs == 0 {
            anyhow::bail!("INGEST_HTTP_TIMEOUT_SECS must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.publish_retry.max_attempts == 0 {
            anyhow::bail!("INGEST_PUBLISH_MAX_ATTEMPTS must be at least 1");
        }
        if self.schedule_interval_secs == 0 {
            anyhow::bail!("INGEST_SCHEDULE_INTERVAL_SECS must be greater than 0");
        }
        if self.task_timeout_secs == 0 {
            anyhow::bail!("INGEST_TASK_TIMEOUT_SECS must be greater than 0");
        }
        if self.broker.rest_url.is_empty() {
            anyhow::bail!("BROKER_REST_URL cannot be empty");
        }
        if self.broker.topic.is_empty() {
            anyhow::bail!("BROKER_TOPIC cannot be empty");
        }
        if self.dead_letter.enabled {
            if self.dead_letter.topic.is_empty() {
                anyhow::bail!("DLQ_TOPIC cannot be empty when DLQ_ENABLED=true");
            }
            if self.dead_letter.topic == self.broker.topic {
                anyhow::bail!(
                    "DLQ_TOPIC must differ from BROKER_TOPIC (both are {:?})",
                    self.broker.topic
                );
            }
        }

        let horizon = self.fetch_backoff().total_delay();
        if horizon >= self.task_timeout() {
            tracing::warn!(
                retry_horizon_secs = horizon.as_secs(),
                task_timeout_secs = self.task_timeout_secs,
                "Fetch retry horizon exceeds the task timeout; late retries will be cut off"
            );
        }

        Ok(())
    }

    /// Backoff policy applied between 5xx fetch attempts
    pub fn fetch_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.fetch_retry.kind,
            Duration::from_secs(self.fetch_retry.base_secs),
            self.fetch_retry.max_retries,
        )
    }

    /// Backoff policy applied between publish attempts
    ///
    /// `max_attempts` counts the first attempt, so the policy allows one fewer retry.
    pub fn publish_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            BackoffKind::Exponential,
            Duration::from_millis(self.publish_retry.base_ms),
            self.publish_retry.max_attempts.saturating_sub(1),
        )
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Concurrency cap, `None` when unbounded
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent_sources > 0).then_some(self.max_concurrent_sources)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
                source_types: SourceType::ALL.to_vec(),
                http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            broker: BrokerConfig {
                rest_url: DEFAULT_BROKER_REST_URL.to_string(),
                timeout_secs: DEFAULT_BROKER_TIMEOUT_SECS,
                topic: DEFAULT_TOPIC.to_string(),
            },
            dead_letter: DeadLetterConfig {
                enabled: true,
                topic: DEFAULT_DLQ_TOPIC.to_string(),
                fallback_dir: PathBuf::from(DEFAULT_DLQ_FALLBACK_DIR),
                max_file_bytes: DEFAULT_DLQ_MAX_FILE_BYTES,
            },
            batch_size: DEFAULT_BATCH_SIZE,
            fetch_retry: FetchRetryConfig {
                max_retries: DEFAULT_FETCH_MAX_RETRIES,
                base_secs: DEFAULT_FETCH_RETRY_BASE_SECS,
                kind: BackoffKind::Exponential,
            },
            publish_retry: PublishRetryConfig {
                max_attempts: DEFAULT_PUBLISH_MAX_ATTEMPTS,
                base_ms: DEFAULT_PUBLISH_RETRY_BASE_MS,
            },
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            max_concurrent_sources: 0,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_config_default() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.fetch_retry.max_retries, 3);
        assert_eq!(config.publish_retry.max_attempts, 3);
        assert_eq!(config.source.source_types, SourceType::ALL.to_vec());
        assert!(config.dead_letter.enabled);
        assert_eq!(config.concurrency_limit(), None);
    }

    #[test]
    fn test_ingest_config_validation_valid() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_batch_size() {
        let config = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_distinct_topics() {
        let mut config = IngestConfig::default();
        config.dead_letter.topic = config.broker.topic.clone();
        assert!(config.validate().is_err());

        config.dead_letter.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_requires_sources() {
        let mut config = IngestConfig::default();
        config.source.source_types.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_fetch_backoff_schedule() {
        let backoff = IngestConfig::default().fetch_backoff();
        assert_eq!(backoff.delay(0), Duration::from_secs(30 * 60));
        assert_eq!(backoff.delay(1), Duration::from_secs(60 * 60));
        assert_eq!(backoff.delay(2), Duration::from_secs(120 * 60));
    }

    #[test]
    fn test_publish_backoff_counts_first_attempt() {
        let backoff = IngestConfig::default().publish_backoff();
        assert_eq!(backoff.max_retries(), 2);
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_concurrency_limit() {
        let config = IngestConfig {
            max_concurrent_sources: 2,
            ..Default::default()
        };
        assert_eq!(config.concurrency_limit(), Some(2));
    }
}
