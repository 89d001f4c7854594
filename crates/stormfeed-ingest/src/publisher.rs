//! Batch delivery to the primary destination with bounded retry

use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::ConnectionManager;
use crate::error::{IngestError, Result};
use crate::models::Batch;
use crate::retry::BackoffPolicy;
use crate::telemetry;

/// Result of publishing one batch
///
/// A batch is delivered whole or not at all, so `count` is either the batch
/// size or zero.
#[derive(Debug)]
pub struct PublishResult {
    pub delivered: bool,
    pub count: usize,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Error from the final attempt when not delivered
    pub last_error: Option<IngestError>,
}

/// Publishes batches through the shared broker connection
pub struct BatchPublisher {
    connections: Arc<ConnectionManager>,
    backoff: BackoffPolicy,
}

impl BatchPublisher {
    /// `backoff.max_retries()` bounds the retries after the first attempt
    pub fn new(connections: Arc<ConnectionManager>, backoff: BackoffPolicy) -> Self {
        Self {
            connections,
            backoff,
        }
    }

    /// Publish `batch` to `destination` as a single broker request, retrying on failure
    pub async fn publish(&self, destination: &str, batch: &Batch) -> PublishResult {
        if batch.is_empty() {
            return PublishResult {
                delivered: true,
                count: 0,
                attempts: 0,
                last_error: None,
            };
        }

        let messages = batch.messages();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let err = match self.attempt(destination, &messages).await {
                Ok(()) => {
                    telemetry::rows_published(destination, batch.len());
                    debug!(
                        destination,
                        source = %batch.source_type,
                        batch = batch.sequence,
                        count = batch.len(),
                        attempts,
                        "Batch published"
                    );
                    return PublishResult {
                        delivered: true,
                        count: batch.len(),
                        attempts,
                        last_error: None,
                    };
                },
                Err(e) => e,
            };

            let retries_used = attempts - 1;
            if !self.backoff.allows_retry(retries_used) {
                warn!(
                    destination,
                    source = %batch.source_type,
                    batch = batch.sequence,
                    attempts,
                    error = %err,
                    "Publish attempts exhausted"
                );
                return PublishResult {
                    delivered: false,
                    count: 0,
                    attempts,
                    last_error: Some(err),
                };
            }

            let delay = self.backoff.delay(retries_used);
            warn!(
                destination,
                source = %batch.source_type,
                batch = batch.sequence,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Publish failed, retrying"
            );
            telemetry::publish_retry();
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, destination: &str, messages: &[serde_json::Value]) -> Result<()> {
        let lease = self
            .connections
            .lease()
            .await
            .map_err(IngestError::Connect)?;

        let sent = lease
            .broker()
            .send(destination, messages)
            .await
            .map_err(|source| IngestError::Publish {
                destination: destination.to_string(),
                source,
            });

        lease.release().await;
        sent
    }
}
