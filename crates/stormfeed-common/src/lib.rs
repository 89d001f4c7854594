//! Stormfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the stormfeed workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Environment**: Typed environment variable lookups used by configuration loaders
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: Shared domain types such as [`types::SourceType`]
//!
//! # Example
//!
//! ```no_run
//! use stormfeed_common::{env, Result};
//!
//! fn batch_size() -> Result<usize> {
//!     env::parse_or("INGEST_BATCH_SIZE", 500)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::SourceType;
