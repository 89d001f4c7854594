//! Kafka REST Proxy (v2) client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BrokerError, BrokerResult, MessageBroker};

const JSON_EMBEDDED_FORMAT: &str = "application/vnd.kafka.json.v2+json";
const V2_RESPONSE_FORMAT: &str = "application/vnd.kafka.v2+json";

/// Publishes JSON records to topics through a Kafka REST Proxy
///
/// Each `send` is one `POST /topics/<topic>` request. The proxy is stateless,
/// so `connect` only checks reachability and `disconnect` is a no-op.
pub struct RestProxyBroker {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<PartitionOffset>,
}

#[derive(Debug, Deserialize)]
struct PartitionOffset {
    error_code: Option<i64>,
    error: Option<String>,
}

impl RestProxyBroker {
    pub fn new(rest_url: &str, timeout: Duration) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stormfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: rest_url.trim_end_matches('/').to_string(),
        })
    }

    fn topics_url(&self) -> String {
        format!("{}/topics", self.base_url)
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }
}

#[async_trait]
impl MessageBroker for RestProxyBroker {
    async fn connect(&self) -> BrokerResult<()> {
        let endpoint = self.topics_url();
        let response = self
            .client
            .get(&endpoint)
            .header(ACCEPT, V2_RESPONSE_FORMAT)
            .send()
            .await
            .map_err(|e| BrokerError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(BrokerError::Connect {
                endpoint,
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn send(&self, destination: &str, messages: &[serde_json::Value]) -> BrokerResult<()> {
        let records: Vec<_> = messages.iter().map(|m| json!({ "value": m })).collect();
        let body = json!({ "records": records });

        let response = self
            .client
            .post(self.topic_url(destination))
            .header(CONTENT_TYPE, JSON_EMBEDDED_FORMAT)
            .header(ACCEPT, V2_RESPONSE_FORMAT)
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let produced: ProduceResponse = response.json().await?;
        let errors: Vec<&PartitionOffset> = produced
            .offsets
            .iter()
            .filter(|o| o.error_code.is_some())
            .collect();

        if let Some(first) = errors.first() {
            return Err(BrokerError::RecordErrors {
                failed: errors.len(),
                total: messages.len(),
                first_error: first
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("error code {}", first.error_code.unwrap_or_default())),
            });
        }

        debug!(destination, count = messages.len(), "Records accepted by REST proxy");
        Ok(())
    }
}
