//! Ingest orchestrator
//!
//! Runs one fetch and publish pipeline per configured source type, each in its
//! own task, and repeats the cycle on a fixed interval. A failing, panicking
//! or hung source never affects its siblings; every task ends in a
//! [`SourceReport`] that is folded into the cycle's [`CycleSummary`].
//!
//! The task timeout bounds the fetch phase only. Once a document is in hand
//! every batch is published to completion so that each record reaches a
//! terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use stormfeed_common::SourceType;

use crate::broker::{ConnectionManager, MessageBroker, RestProxyBroker};
use crate::config::IngestConfig;
use crate::dead_letter::{DeadLetterManager, DeadLetterOutcome, PublishFailure};
use crate::error::IngestError;
use crate::fetcher::{source_url, DocumentFetcher, HttpFetcher};
use crate::models::{AttemptOutcome, Batch, JobAttempt};
use crate::parser::{Batches, RecordReader};
use crate::publisher::BatchPublisher;
use crate::retry::BackoffPolicy;
use crate::telemetry;

/// Why a source was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Upstream answered 404; the day's file is not published yet
    NotYetAvailable,
}

/// Why a source failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    /// 5xx on every allowed attempt
    MaxRetriesExceeded { status: u16 },
    /// 4xx other than 404, or any other non-success status
    ClientError { status: u16 },
    TransportError,
    /// 2xx with an empty or undecodable body
    InvalidResponse,
    TimedOut,
    Panicked,
}

/// Terminal state of one source task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    Completed,
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl SourceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SourceOutcome::Completed => "completed",
            SourceOutcome::Skipped(_) => "skipped",
            SourceOutcome::Failed(_) => "failed",
        }
    }
}

/// Where the records of one source ended up
///
/// Every parsed record is counted in exactly one of the terminal buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordTally {
    pub parsed: usize,
    pub published: usize,
    pub dead_lettered: usize,
    pub fallback: usize,
    pub lost: usize,
    /// Rows that could not be decoded and never became records
    pub malformed_rows: u64,
}

impl RecordTally {
    /// Records with a terminal outcome
    pub fn terminal(&self) -> usize {
        self.published + self.dead_lettered + self.fallback + self.lost
    }
}

/// Result of one source task
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_type: SourceType,
    pub url: String,
    pub outcome: SourceOutcome,
    pub attempts: Vec<JobAttempt>,
    pub records: RecordTally,
    pub batches: usize,
    /// Last error seen by the task, if it ended badly
    pub error: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl SourceReport {
    fn new(source_type: SourceType, url: String) -> Self {
        Self {
            source_type,
            url,
            outcome: SourceOutcome::Completed,
            attempts: Vec::new(),
            records: RecordTally::default(),
            batches: 0,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    fn failed(source_type: SourceType, url: String, reason: FailureReason, error: String) -> Self {
        Self {
            outcome: SourceOutcome::Failed(reason),
            error: Some(error),
            ..Self::new(source_type, url)
        }
    }
}

/// Aggregate result of one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reports: Vec<SourceReport>,
}

impl CycleSummary {
    pub fn from_reports(reports: Vec<SourceReport>) -> Self {
        let mut summary = CycleSummary::default();
        for report in &reports {
            match report.outcome {
                SourceOutcome::Completed => summary.succeeded += 1,
                SourceOutcome::Skipped(_) => summary.skipped += 1,
                SourceOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary.reports = reports;
        summary
    }

    pub fn report(&self, source_type: SourceType) -> Option<&SourceReport> {
        self.reports.iter().find(|r| r.source_type == source_type)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Shared, immutable state used by every source task
struct SourcePipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    connections: Arc<ConnectionManager>,
    publisher: BatchPublisher,
    dead_letter: DeadLetterManager,
    base_url: String,
    topic: String,
    batch_size: usize,
    fetch_backoff: BackoffPolicy,
    fetch_timeout: Duration,
}

/// How a failed fetch steers the per-source state machine
enum FetchFailure {
    Retryable(u16),
    NotFound,
    Client(u16),
    Transport,
    Invalid,
}

impl FetchFailure {
    fn classify(error: &IngestError) -> Self {
        match (error.http_status(), error) {
            (Some(404), _) => FetchFailure::NotFound,
            (Some(status), _) if (500..600).contains(&status) => FetchFailure::Retryable(status),
            (Some(status), _) => FetchFailure::Client(status),
            (None, IngestError::Transport { .. }) => FetchFailure::Transport,
            (None, _) => FetchFailure::Invalid,
        }
    }
}

impl SourcePipeline {
    async fn run(&self, source_type: SourceType, url: String) -> SourceReport {
        let started = Instant::now();
        let mut report = SourceReport::new(source_type, url);

        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            self.fetch_with_retry(source_type, &report.url, &mut report.attempts),
        )
        .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(_) => {
                let timeout_secs = self.fetch_timeout.as_secs();
                error!(
                    url = %report.url,
                    timeout_secs,
                    "Source task timed out before a document arrived"
                );
                Err((
                    SourceOutcome::Failed(FailureReason::TimedOut),
                    Some(format!("fetch exceeded {timeout_secs}s")),
                ))
            },
        };

        match fetched {
            Ok(body) => self.publish_document(&body, &mut report).await,
            Err((outcome, error)) => {
                report.outcome = outcome;
                report.error = error;
            },
        }

        report.elapsed = started.elapsed();
        report
    }

    /// Attempt the fetch until success or a terminal response
    async fn fetch_with_retry(
        &self,
        source_type: SourceType,
        url: &str,
        attempts: &mut Vec<JobAttempt>,
    ) -> std::result::Result<String, (SourceOutcome, Option<String>)> {
        let mut retries_used = 0u32;

        loop {
            let attempt_number = attempts.len() as u32 + 1;
            let started = Instant::now();
            let result = self.fetcher.fetch(url).await;
            telemetry::fetch_duration(source_type, started.elapsed());

            let mut record = |outcome| {
                attempts.push(JobAttempt {
                    source_type,
                    attempt_number,
                    outcome,
                })
            };

            let err = match result {
                Ok(body) => {
                    record(AttemptOutcome::Success);
                    debug!(url, attempt = attempt_number, bytes = body.len(), "Fetch succeeded");
                    return Ok(body);
                },
                Err(e) => e,
            };

            let outcome = match FetchFailure::classify(&err) {
                FetchFailure::Retryable(status) if self.fetch_backoff.allows_retry(retries_used) => {
                    record(AttemptOutcome::RetryScheduled);
                    let delay = self.fetch_backoff.delay(retries_used);
                    warn!(
                        url,
                        status,
                        attempt = attempt_number,
                        delay_secs = delay.as_secs(),
                        "Upstream server error, retry scheduled"
                    );
                    telemetry::fetch_retry(source_type);
                    tokio::time::sleep(delay).await;
                    retries_used += 1;
                    continue;
                },
                FetchFailure::Retryable(status) => {
                    record(AttemptOutcome::Failed);
                    error!(url, status, attempts = attempt_number, "Fetch retries exhausted");
                    SourceOutcome::Failed(FailureReason::MaxRetriesExceeded { status })
                },
                FetchFailure::NotFound => {
                    record(AttemptOutcome::Skipped);
                    info!(url, "Report not yet available, skipping");
                    SourceOutcome::Skipped(SkipReason::NotYetAvailable)
                },
                FetchFailure::Client(status) => {
                    record(AttemptOutcome::Failed);
                    error!(url, status, attempts = attempt_number, "Upstream rejected request");
                    SourceOutcome::Failed(FailureReason::ClientError { status })
                },
                FetchFailure::Transport => {
                    record(AttemptOutcome::Failed);
                    error!(url, attempts = attempt_number, error = %err, "Fetch transport error");
                    SourceOutcome::Failed(FailureReason::TransportError)
                },
                FetchFailure::Invalid => {
                    record(AttemptOutcome::Failed);
                    error!(url, attempts = attempt_number, error = %err, "Invalid upstream response");
                    SourceOutcome::Failed(FailureReason::InvalidResponse)
                },
            };

            let error = match outcome {
                SourceOutcome::Skipped(_) => None,
                _ => Some(err.to_string()),
            };
            return Err((outcome, error));
        }
    }

    /// Decode the body and publish it batch by batch
    async fn publish_document(&self, body: &str, report: &mut SourceReport) {
        let source_type = report.source_type;

        let reader = match RecordReader::from_text(source_type, body) {
            Ok(reader) => reader,
            Err(e) => {
                error!(url = %report.url, error = %e, "Document header could not be decoded");
                report.outcome = SourceOutcome::Failed(FailureReason::InvalidResponse);
                report.error = Some(e.to_string());
                return;
            },
        };

        // Held for the whole document so per-batch leases never churn the connection
        let lease = match self.connections.lease().await {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!(error = %e, "Broker unavailable before publishing, attempts will retry");
                None
            },
        };

        let mut malformed = 0u64;
        let url = report.url.clone();
        let records = reader.filter_map(|row| match row {
            Ok(record) => Some(record),
            Err(e) => {
                malformed += 1;
                warn!(url = %url, error = %e, "Skipping malformed row");
                None
            },
        });

        for batch in Batches::new(records, source_type, self.batch_size) {
            report.batches += 1;
            report.records.parsed += batch.len();
            self.deliver(&batch, &report.url, &mut report.records).await;
        }

        report.records.malformed_rows = malformed;

        if let Some(lease) = lease {
            lease.release().await;
        }

        telemetry::rows_processed(source_type, report.records.parsed);
        info!(
            url = %report.url,
            batches = report.batches,
            parsed = report.records.parsed,
            published = report.records.published,
            dead_lettered = report.records.dead_lettered,
            fallback = report.records.fallback,
            lost = report.records.lost,
            malformed = report.records.malformed_rows,
            "Source ingested"
        );
    }

    /// Publish one batch and route it to a terminal outcome
    async fn deliver(&self, batch: &Batch, url: &str, tally: &mut RecordTally) {
        let result = self.publisher.publish(&self.topic, batch).await;

        let Some(error) = result.last_error else {
            tally.published += result.count;
            return;
        };

        if !self.dead_letter.is_enabled() {
            error!(
                url,
                source = %batch.source_type,
                batch = batch.sequence,
                destination = %self.topic,
                attempts = result.attempts,
                count = batch.len(),
                error_kind = error.kind(),
                error = %error,
                "Batch undeliverable and dead-lettering is disabled, records lost"
            );
            telemetry::rows_lost(batch.len());
            tally.lost += batch.len();
            return;
        }

        let failure = PublishFailure {
            destination: &self.topic,
            source_url: url,
            attempts: result.attempts,
            error: &error,
        };

        match self.dead_letter.dead_letter(batch, &failure).await {
            DeadLetterOutcome::Delivered(count) => tally.dead_lettered += count,
            DeadLetterOutcome::FileFallback { count, .. } => tally.fallback += count,
            DeadLetterOutcome::Lost { count } => tally.lost += count,
            DeadLetterOutcome::Skipped => tally.lost += batch.len(),
        }
    }
}

/// Schedules and runs ingest cycles
pub struct IngestOrchestrator {
    pipeline: Arc<SourcePipeline>,
    source_types: Vec<SourceType>,
    limiter: Option<Arc<Semaphore>>,
    schedule_interval: Duration,
}

impl IngestOrchestrator {
    /// Build an orchestrator over the given fetcher and broker
    pub fn new(
        config: &IngestConfig,
        fetcher: Arc<dyn DocumentFetcher>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(broker));

        let pipeline = SourcePipeline {
            fetcher,
            connections: Arc::clone(&connections),
            publisher: BatchPublisher::new(Arc::clone(&connections), config.publish_backoff()),
            dead_letter: DeadLetterManager::new(
                Arc::clone(&connections),
                config.dead_letter.clone(),
            ),
            base_url: config.source.base_url.clone(),
            topic: config.broker.topic.clone(),
            batch_size: config.batch_size,
            fetch_backoff: config.fetch_backoff(),
            fetch_timeout: config.task_timeout(),
        };

        Self {
            pipeline: Arc::new(pipeline),
            source_types: config.source.source_types.clone(),
            limiter: config
                .concurrency_limit()
                .map(|limit| Arc::new(Semaphore::new(limit))),
            schedule_interval: config.schedule_interval(),
        }
    }

    /// Build an orchestrator with the HTTP fetcher and REST proxy broker
    pub fn from_config(config: &IngestConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.source.http_timeout_secs))?;
        let broker = RestProxyBroker::new(
            &config.broker.rest_url,
            Duration::from_secs(config.broker.timeout_secs),
        )?;

        Ok(Self::new(config, Arc::new(fetcher), Arc::new(broker)))
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.pipeline.connections)
    }

    /// Readiness: whether the broker connection is currently established
    pub fn is_ready(&self) -> bool {
        self.pipeline.connections.is_connected()
    }

    /// Run every source once for today's date
    pub async fn run_cycle(&self) -> CycleSummary {
        self.run_cycle_for(Utc::now().date_naive()).await
    }

    /// Run every source once for `date`
    ///
    /// Never fails: task errors, panics and timeouts become failed reports.
    pub async fn run_cycle_for(&self, date: NaiveDate) -> CycleSummary {
        let started = Instant::now();
        telemetry::job_run_started();
        info!(%date, sources = self.source_types.len(), "Starting ingest cycle");

        // Permits are taken here, in source order, so a limited cycle starts
        // sources in the order they are configured
        let mut tasks = Vec::with_capacity(self.source_types.len());
        for &source_type in &self.source_types {
            let permit = match &self.limiter {
                Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                None => None,
            };
            let url = source_url(&self.pipeline.base_url, source_type, date);
            let handle = self.spawn_source(source_type, url.clone(), permit);
            tasks.push((source_type, url, handle));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (source_type, url, handle) in tasks {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(source = %source_type, url = %url, error = %e, "Source task aborted");
                    SourceReport::failed(source_type, url, FailureReason::Panicked, e.to_string())
                },
            };

            telemetry::source_outcome(source_type, report.outcome.label());
            reports.push(report);
        }

        let summary = CycleSummary::from_reports(reports);
        let elapsed = started.elapsed();
        telemetry::job_run_finished(elapsed);

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = elapsed.as_millis() as u64,
            "Ingest cycle completed"
        );

        summary
    }

    fn spawn_source(
        &self,
        source_type: SourceType,
        url: String,
        permit: Option<OwnedSemaphorePermit>,
    ) -> JoinHandle<SourceReport> {
        let pipeline = Arc::clone(&self.pipeline);
        let span = info_span!("source", source = %source_type);

        tokio::spawn(
            async move {
                let _permit = permit;
                pipeline.run(source_type, url).await
            }
            .instrument(span),
        )
    }

    /// Start the scheduler in background
    ///
    /// Runs a cycle immediately, then once per schedule interval. Cancelling
    /// `shutdown` stops scheduling; a cycle already running completes.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.schedule_interval.as_secs(),
                sources = ?self.source_types,
                "Ingest scheduler started"
            );

            let mut ticker = tokio::time::interval(self.schedule_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = self.run_cycle().await;
                        if summary.has_failures() {
                            warn!(failed = summary.failed, "Cycle finished with failed sources");
                        }
                    },
                }
            }

            info!("Ingest scheduler stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn report(outcome: SourceOutcome) -> SourceReport {
        SourceReport {
            outcome,
            ..SourceReport::new(SourceType::Hail, "http://x".to_string())
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = CycleSummary::from_reports(vec![
            report(SourceOutcome::Completed),
            report(SourceOutcome::Skipped(SkipReason::NotYetAvailable)),
            report(SourceOutcome::Failed(FailureReason::TimedOut)),
            report(SourceOutcome::Completed),
        ]);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_failures());
    }

    #[test]
    fn test_classify_fetch_errors() {
        let status = |status| IngestError::HttpStatus {
            status,
            url: "http://x".to_string(),
        };
        assert!(matches!(FetchFailure::classify(&status(404)), FetchFailure::NotFound));
        assert!(matches!(FetchFailure::classify(&status(502)), FetchFailure::Retryable(502)));
        assert!(matches!(FetchFailure::classify(&status(401)), FetchFailure::Client(401)));
        assert!(matches!(
            FetchFailure::classify(&IngestError::EmptyBody { url: "http://x".to_string() }),
            FetchFailure::Invalid
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let failed = serde_json::to_value(SourceOutcome::Failed(FailureReason::ClientError {
            status: 403,
        }))
        .unwrap();
        assert_eq!(failed["failed"]["reason"], "client_error");
        assert_eq!(failed["failed"]["status"], 403);
        assert_eq!(
            serde_json::to_value(SourceOutcome::Completed).unwrap(),
            "completed"
        );
    }

    #[test]
    fn test_tally_terminal_sum() {
        let tally = RecordTally {
            parsed: 10,
            published: 4,
            dead_lettered: 3,
            fallback: 2,
            lost: 1,
            malformed_rows: 2,
        };
        assert_eq!(tally.terminal(), tally.parsed);
    }
}
