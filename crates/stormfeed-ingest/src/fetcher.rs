//! Remote document retrieval
//!
//! Daily report files live at `<base>/<YYMMDD>_rpts_<tag>.csv`. The upstream
//! answers 404 until a day's file is published.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::debug;

use stormfeed_common::SourceType;

use crate::error::{IngestError, Result};

/// URL of the report file for `source_type` on `date`
pub fn source_url(base: &str, source_type: SourceType, date: NaiveDate) -> String {
    format!(
        "{}/{}_rpts_{}.csv",
        base.trim_end_matches('/'),
        date.format("%y%m%d"),
        source_type.tag()
    )
}

/// Retrieves a document body by URL
///
/// Implementations map failures onto [`IngestError::Transport`],
/// [`IngestError::HttpStatus`] and [`IngestError::EmptyBody`]; the orchestrator
/// decides retry policy from those variants alone.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP GET fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stormfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "Fetching document");

        let transport = |source| IngestError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await.map_err(transport)?;
        if body.trim().is_empty() {
            return Err(IngestError::EmptyBody {
                url: url.to_string(),
            });
        }

        debug!(url, bytes = body.len(), "Fetched document");
        Ok(body)
    }
}
