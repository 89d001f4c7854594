//! Dead-letter stage: secondary delivery with a local file fallback
//!
//! A batch that exhausted its publish attempts is wrapped record by record in
//! [`DeadLetterEnvelope`]s sharing one batch id and sent to the dead-letter
//! topic in a single attempt. If that fails too the envelopes are written to a
//! JSON file in the fallback directory. If the file cannot be written the loss
//! is logged with `critical = true` and the pipeline carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::ConnectionManager;
use crate::config::DeadLetterConfig;
use crate::error::{IngestError, Result};
use crate::models::{
    Batch, DeadLetterEnvelope, DeadLetterMetadata, FallbackFileMetadata, FileFallbackRecord,
};
use crate::telemetry;

/// Upper bound on `-N` suffixes tried when fallback file names collide
const MAX_NAME_SUFFIX: u32 = 1000;

/// Why a batch is being dead-lettered
#[derive(Debug, Clone, Copy)]
pub struct PublishFailure<'a> {
    /// Primary destination the batch was meant for
    pub destination: &'a str,
    pub source_url: &'a str,
    /// Publish attempts made before giving up
    pub attempts: u32,
    pub error: &'a IngestError,
}

/// Terminal outcome of a dead-lettered batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterOutcome {
    /// Stage disabled or nothing to do
    Skipped,
    /// Envelopes accepted by the dead-letter topic
    Delivered(usize),
    /// Envelopes persisted to a local file
    FileFallback { path: PathBuf, count: usize },
    /// Nothing could hold the records
    Lost { count: usize },
}

impl DeadLetterOutcome {
    /// Envelopes delivered to the dead-letter topic
    pub fn delivered_count(&self) -> usize {
        match self {
            DeadLetterOutcome::Delivered(count) => *count,
            _ => 0,
        }
    }
}

/// Name of the fallback file for a batch failed at `timestamp`
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use stormfeed_ingest::dead_letter::fallback_file_name;
///
/// let ts = Utc.with_ymd_and_hms(2024, 5, 6, 21, 4, 5).unwrap();
/// assert_eq!(fallback_file_name(ts), "dlq-fallback-2024-05-06T21-04-05-000Z.json");
/// ```
pub fn fallback_file_name(timestamp: DateTime<Utc>) -> String {
    let iso = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!("dlq-fallback-{}.json", iso.replace([':', '.'], "-"))
}

pub struct DeadLetterManager {
    connections: Arc<ConnectionManager>,
    config: DeadLetterConfig,
}

impl DeadLetterManager {
    pub fn new(connections: Arc<ConnectionManager>, config: DeadLetterConfig) -> Self {
        Self {
            connections,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Route a batch that failed primary publish to its next terminal outcome
    ///
    /// Never returns an error; every failure mode is reflected in the outcome.
    pub async fn dead_letter(&self, batch: &Batch, failure: &PublishFailure<'_>) -> DeadLetterOutcome {
        if !self.config.enabled || batch.is_empty() {
            return DeadLetterOutcome::Skipped;
        }

        let batch_id = Uuid::new_v4();
        let envelopes = wrap(batch, failure, batch_id);
        let count = envelopes.len();

        match self.publish_envelopes(&envelopes).await {
            Ok(()) => {
                info!(
                    %batch_id,
                    topic = %self.config.topic,
                    source = %batch.source_type,
                    count,
                    "Batch dead-lettered"
                );
                telemetry::rows_dead_lettered(count);
                DeadLetterOutcome::Delivered(count)
            },
            Err(e) => {
                warn!(
                    %batch_id,
                    topic = %self.config.topic,
                    count,
                    error = %e,
                    "Dead-letter publish failed, writing fallback file"
                );
                self.fall_back(envelopes, &e, batch_id).await
            },
        }
    }

    async fn publish_envelopes(&self, envelopes: &[DeadLetterEnvelope]) -> Result<()> {
        let messages = envelopes
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let lease = self
            .connections
            .lease()
            .await
            .map_err(IngestError::Connect)?;

        let sent = lease
            .broker()
            .send(&self.config.topic, &messages)
            .await
            .map_err(|source| IngestError::DeadLetterPublish {
                destination: self.config.topic.clone(),
                source,
            });

        lease.release().await;
        sent
    }

    async fn fall_back(
        &self,
        envelopes: Vec<DeadLetterEnvelope>,
        reason: &IngestError,
        batch_id: Uuid,
    ) -> DeadLetterOutcome {
        let count = envelopes.len();
        let record = FileFallbackRecord {
            failed_envelopes: envelopes,
            file_metadata: FallbackFileMetadata {
                timestamp: Utc::now(),
                count,
                reason: reason.to_string(),
            },
        };

        match self.persist(&record).await {
            Ok(path) => {
                warn!(
                    %batch_id,
                    path = %path.display(),
                    count,
                    "Dead-letter batch written to fallback file"
                );
                telemetry::rows_fallback(count);
                DeadLetterOutcome::FileFallback { path, count }
            },
            Err(e) => {
                let sample = record
                    .failed_envelopes
                    .first()
                    .and_then(|envelope| serde_json::to_string(envelope).ok())
                    .unwrap_or_default();
                error!(
                    critical = true,
                    %batch_id,
                    lost = count,
                    error = %e,
                    reason = %reason,
                    sample_envelope = %sample,
                    "Irrecoverable loss: fallback file could not be written"
                );
                telemetry::rows_lost(count);
                DeadLetterOutcome::Lost { count }
            },
        }
    }

    /// Write `record` to a new file in the fallback directory
    async fn persist(&self, record: &FileFallbackRecord) -> Result<PathBuf> {
        let contents = serde_json::to_vec_pretty(record)?;
        if contents.len() as u64 > self.config.max_file_bytes {
            warn!(
                bytes = contents.len(),
                max_bytes = self.config.max_file_bytes,
                "Fallback file exceeds configured size limit, writing anyway"
            );
        }

        let dir = &self.config.fallback_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| IngestError::FileWrite {
                path: dir.clone(),
                source,
            })?;

        let base = fallback_file_name(record.file_metadata.timestamp);
        for suffix in 0..MAX_NAME_SUFFIX {
            let path = dir.join(candidate_name(&base, suffix));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_all_synced(file, &contents, &path).await?;
                    return Ok(path);
                },
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(IngestError::FileWrite { path, source }),
            }
        }

        Err(IngestError::FileWrite {
            path: dir.join(base),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free fallback file name",
            ),
        })
    }
}

fn wrap(batch: &Batch, failure: &PublishFailure<'_>, batch_id: Uuid) -> Vec<DeadLetterEnvelope> {
    let timestamp = Utc::now();
    let error_message = failure.error.to_string();
    let error_trace = failure.error.trace();

    batch
        .records
        .iter()
        .map(|record| DeadLetterEnvelope {
            original_record: record.clone(),
            metadata: DeadLetterMetadata {
                timestamp,
                original_destination: failure.destination.to_string(),
                error_kind: failure.error.kind().to_string(),
                error_message: error_message.clone(),
                error_trace: error_trace.clone(),
                attempt_number: failure.attempts.max(1),
                batch_id,
                source_url: failure.source_url.to_string(),
                source_type: record.source_type(),
            },
        })
        .collect()
}

fn candidate_name(base: &str, suffix: u32) -> String {
    if suffix == 0 {
        return base.to_string();
    }
    match base.strip_suffix(".json") {
        Some(stem) => format!("{stem}-{suffix}.json"),
        None => format!("{base}-{suffix}"),
    }
}

/// Write and fsync `contents`; a partially written file is removed on failure
async fn write_all_synced(mut file: tokio::fs::File, contents: &[u8], path: &Path) -> Result<()> {
    let written = async {
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    let Err(source) = written else {
        return Ok(());
    };

    drop(file);
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove partial fallback file");
    }

    Err(IngestError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
