//! Error taxonomy for the ingestion pipeline
//!
//! Every failure a source task can hit maps to one [`IngestError`] variant.
//! The variant decides the policy applied by the caller (retry, skip,
//! dead-letter, fallback) and its [`IngestError::kind`] tag is what lands in
//! dead-letter metadata and log fields.

use std::path::PathBuf;

use thiserror::Error;

use crate::broker::BrokerError;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    #[error("Malformed row {row}: {source}")]
    Parse {
        row: u64,
        #[source]
        source: csv::Error,
    },

    #[error("Broker connection failed")]
    Connect(#[source] BrokerError),

    #[error("Publish to {destination} failed")]
    Publish {
        destination: String,
        #[source]
        source: BrokerError,
    },

    #[error("Dead-letter publish to {destination} failed")]
    DeadLetterPublish {
        destination: String,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to write fallback file {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Stable machine-readable tag for logs and dead-letter metadata
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Transport { .. } => "transport_error",
            IngestError::HttpStatus { status: 404, .. } => "http_not_found",
            IngestError::HttpStatus { status, .. } if (500..600).contains(status) => {
                "http_server_error"
            },
            IngestError::HttpStatus { .. } => "http_client_error",
            IngestError::EmptyBody { .. } => "empty_body",
            IngestError::Parse { .. } => "parse_error",
            IngestError::Connect(_) => "broker_connect_error",
            IngestError::Publish { .. } => "publish_error",
            IngestError::DeadLetterPublish { .. } => "dead_letter_publish_error",
            IngestError::FileWrite { .. } => "file_write_error",
            IngestError::Serialization(_) => "serialization_error",
        }
    }

    /// HTTP status carried by the error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            IngestError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The chain of underlying causes, outermost first, one per line
    ///
    /// Returns `None` when the error has no underlying cause.
    pub fn trace(&self) -> Option<String> {
        let mut lines = Vec::new();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            lines.push(err.to_string());
            cause = err.source();
        }

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kinds() {
        let status = |status| IngestError::HttpStatus {
            status,
            url: "http://example.invalid".to_string(),
        };

        assert_eq!(status(404).kind(), "http_not_found");
        assert_eq!(status(503).kind(), "http_server_error");
        assert_eq!(status(403).kind(), "http_client_error");
        assert_eq!(status(503).http_status(), Some(503));
    }

    #[test]
    fn test_trace_walks_sources() {
        let err = IngestError::Publish {
            destination: "storm-reports".to_string(),
            source: BrokerError::Rejected {
                status: 500,
                body: "leader not available".to_string(),
            },
        };

        assert_eq!(err.kind(), "publish_error");
        let trace = err.trace().unwrap_or_default();
        assert!(trace.contains("leader not available"));

        let bare = IngestError::EmptyBody {
            url: "http://example.invalid".to_string(),
        };
        assert!(bare.trace().is_none());
    }
}
