//! Message broker seam
//!
//! The pipeline only ever talks to a broker through [`MessageBroker`]. The
//! production implementation is [`RestProxyBroker`]; tests substitute their own
//! doubles. Connection lifetime is shared across tasks by [`ConnectionManager`].

pub mod connection;
pub mod rest_proxy;

use async_trait::async_trait;
use thiserror::Error;

pub use connection::ConnectionManager;
pub use rest_proxy::RestProxyBroker;

/// Result type for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Broker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Broker rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Broker rejected {failed} of {total} records: {first_error}")]
    RecordErrors {
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("Broker is not connected")]
    NotConnected,
}

/// A destination-addressed, all-or-nothing message sink
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Establish the underlying connection
    async fn connect(&self) -> BrokerResult<()>;

    /// Tear down the underlying connection
    async fn disconnect(&self) -> BrokerResult<()>;

    /// Send `messages` to `destination` in a single request
    ///
    /// Either every message is accepted or an error is returned.
    async fn send(&self, destination: &str, messages: &[serde_json::Value]) -> BrokerResult<()>;
}
