//! Shared test doubles for the ingest integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stormfeed_common::SourceType;
use stormfeed_ingest::broker::{BrokerError, BrokerResult, MessageBroker};
use stormfeed_ingest::config::IngestConfig;
use stormfeed_ingest::fetcher::DocumentFetcher;
use stormfeed_ingest::IngestError;

pub const PRIMARY_TOPIC: &str = "storm-reports";
pub const DLQ_TOPIC: &str = "storm-reports-dlq";

/// One scripted upstream response
#[derive(Debug, Clone)]
pub enum Step {
    Body(String),
    Status(u16),
    Empty,
    Hang,
    Panic,
}

/// Replays a per-source script of responses; the last step repeats
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<SourceType, VecDeque<Step>>>,
    latency: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(self, source: SourceType, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source, steps.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, source: SourceType) -> usize {
        let needle = format!("_rpts_{}.csv", source.tag());
        self.calls().iter().filter(|url| url.ends_with(&needle)).count()
    }

    fn next_step(&self, url: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        let source = SourceType::ALL
            .into_iter()
            .find(|s| url.ends_with(&format!("_rpts_{}.csv", s.tag())));

        let script = match source {
            Some(source) => scripts.get_mut(&source),
            None => None,
        };
        let Some(script) = script else {
            return Step::Status(404);
        };

        if script.len() > 1 {
            script.pop_front().unwrap_or(Step::Status(404))
        } else {
            script.front().cloned().unwrap_or(Step::Status(404))
        }
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, IngestError> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self.next_step(url);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match step {
            Step::Body(body) => Ok(body),
            Step::Status(status) => Err(IngestError::HttpStatus {
                status,
                url: url.to_string(),
            }),
            Step::Empty => Err(IngestError::EmptyBody {
                url: url.to_string(),
            }),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted fetch panic for {url}"),
        }
    }
}

/// Records every send and rejects those aimed at a failing destination
#[derive(Default)]
pub struct RecordingBroker {
    failing: Mutex<HashSet<String>>,
    sends: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
    attempts: Mutex<Vec<String>>,
    send_latency: Duration,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(destinations: &[&str]) -> Self {
        let broker = Self::default();
        broker
            .failing
            .lock()
            .unwrap()
            .extend(destinations.iter().map(|d| d.to_string()));
        broker
    }

    /// Every send takes `latency` before it is answered
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            send_latency: latency,
            ..Self::default()
        }
    }

    /// Accepted sends to `destination`, in order
    pub fn delivered(&self, destination: &str) -> Vec<Vec<serde_json::Value>> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, messages)| messages.clone())
            .collect()
    }

    /// Send attempts to `destination`, accepted or not
    pub fn attempts_to(&self, destination: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|d| *d == destination)
            .count()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn connect(&self) -> BrokerResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, destination: &str, messages: &[serde_json::Value]) -> BrokerResult<()> {
        self.attempts.lock().unwrap().push(destination.to_string());

        if !self.send_latency.is_zero() {
            tokio::time::sleep(self.send_latency).await;
        }

        if self.failing.lock().unwrap().contains(destination) {
            return Err(BrokerError::Rejected {
                status: 503,
                body: format!("{destination} unavailable"),
            });
        }

        self.sends
            .lock()
            .unwrap()
            .push((destination.to_string(), messages.to_vec()));
        Ok(())
    }
}

/// Configuration with short publish backoff and the given sources
pub fn test_config(sources: &[SourceType], fallback_dir: &Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.source.base_url = "http://upstream.test/reports".to_string();
    config.source.source_types = sources.to_vec();
    config.broker.topic = PRIMARY_TOPIC.to_string();
    config.dead_letter.topic = DLQ_TOPIC.to_string();
    config.dead_letter.fallback_dir = fallback_dir.to_path_buf();
    config.publish_retry.base_ms = 1;
    config
}

/// A CSV document with `rows` data rows
pub fn wind_csv(rows: usize) -> String {
    let mut csv = String::from("Time,Speed,Location,County,State,Lat,Lon,Comments\n");
    for i in 0..rows {
        csv.push_str(&format!(
            "{},UNK,{} N Salina,Saline,KS,38.{:02},-97.61,Trees down. (ICT)\n",
            1400 + i,
            i + 1,
            i
        ));
    }
    csv
}

pub fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
