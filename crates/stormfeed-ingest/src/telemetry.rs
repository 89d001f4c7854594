//! Metric emission through the `metrics` facade
//!
//! Installing a recorder is the binary's concern; without one every call here
//! is a no-op.

use std::time::Duration;

use metrics::{counter, histogram};

use stormfeed_common::SourceType;

pub fn job_run_started() {
    counter!("stormfeed_job_runs_total").increment(1);
}

pub fn job_run_finished(elapsed: Duration) {
    histogram!("stormfeed_job_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn fetch_duration(source: SourceType, elapsed: Duration) {
    histogram!("stormfeed_source_fetch_duration_seconds", "source" => source.tag())
        .record(elapsed.as_secs_f64());
}

pub fn fetch_retry(source: SourceType) {
    counter!("stormfeed_fetch_retries_total", "source" => source.tag()).increment(1);
}

/// `outcome` is one of `completed`, `skipped`, `failed`
pub fn source_outcome(source: SourceType, outcome: &'static str) {
    counter!("stormfeed_source_outcomes_total", "source" => source.tag(), "outcome" => outcome)
        .increment(1);
}

pub fn rows_processed(source: SourceType, count: usize) {
    counter!("stormfeed_rows_processed_total", "source" => source.tag()).increment(count as u64);
}

pub fn rows_published(destination: &str, count: usize) {
    counter!("stormfeed_rows_published_total", "destination" => destination.to_string())
        .increment(count as u64);
}

pub fn publish_retry() {
    counter!("stormfeed_publish_retries_total").increment(1);
}

pub fn rows_dead_lettered(count: usize) {
    counter!("stormfeed_rows_dead_lettered_total").increment(count as u64);
}

pub fn rows_fallback(count: usize) {
    counter!("stormfeed_rows_fallback_total").increment(count as u64);
}

pub fn rows_lost(count: usize) {
    counter!("stormfeed_rows_lost_total").increment(count as u64);
}
