//! Stormfeed Ingest Library
//!
//! Pulls the daily storm report documents over HTTP, turns every row into a
//! JSON message and delivers it to a broker topic. Records that cannot be
//! published go to a dead-letter topic, then to a local fallback file, and are
//! only ever dropped with a critical log line.
//!
//! # Pipeline
//!
//! - [`orchestrator`]: per-source tasks, fetch retry state machine, scheduling
//! - [`fetcher`] and [`parser`]: document retrieval, CSV decoding, batching
//! - [`publisher`]: batch publish with bounded retry
//! - [`dead_letter`]: dead-letter envelopes and file fallback
//! - [`broker`]: broker seam, shared connection, REST proxy client
//!
//! # Example
//!
//! ```no_run
//! use stormfeed_ingest::{IngestConfig, IngestOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let orchestrator = IngestOrchestrator::from_config(&config)?;
//!     let summary = orchestrator.run_cycle().await;
//!     println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod publisher;
pub mod retry;
pub mod telemetry;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use orchestrator::{CycleSummary, IngestOrchestrator, SourceOutcome, SourceReport};
