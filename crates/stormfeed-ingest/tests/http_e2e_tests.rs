//! End-to-end tests against mock HTTP servers
//!
//! Covers:
//! - `HttpFetcher` status and body handling
//! - `RestProxyBroker` reachability check and produce requests
//! - A full cycle from an upstream server to a REST proxy

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::{test_config, wind_csv, DLQ_TOPIC, PRIMARY_TOPIC};
use serde_json::json;
use stormfeed_common::SourceType;
use stormfeed_ingest::broker::{BrokerError, MessageBroker, RestProxyBroker};
use stormfeed_ingest::fetcher::{DocumentFetcher, HttpFetcher};
use stormfeed_ingest::{IngestError, IngestOrchestrator, SourceOutcome};
use tempfile::TempDir;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).expect("Failed to build HTTP client")
}

fn proxy(server: &MockServer) -> RestProxyBroker {
    RestProxyBroker::new(&server.uri(), Duration::from_secs(5)).expect("Failed to build client")
}

fn produce_ok(count: usize) -> serde_json::Value {
    let offsets: Vec<_> = (0..count)
        .map(|i| json!({ "partition": 0, "offset": i, "error_code": null, "error": null }))
        .collect();
    json!({ "key_schema_id": null, "value_schema_id": null, "offsets": offsets })
}

#[tokio::test]
async fn test_fetch_returns_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports/240506_rpts_hail.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wind_csv(2)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/reports/240506_rpts_hail.csv", mock_server.uri());
    let body = fetcher().fetch(&url).await.unwrap();
    assert!(body.starts_with("Time,Speed,Location"));
    assert_eq!(body.lines().count(), 3);
}

#[tokio::test]
async fn test_fetch_maps_status_codes() {
    let mock_server = MockServer::start().await;

    for (file, status) in [("missing.csv", 404), ("broken.csv", 503), ("denied.csv", 403)] {
        Mock::given(method("GET"))
            .and(path(format!("/{file}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;
    }

    for (file, expected) in [("missing.csv", 404), ("broken.csv", 503), ("denied.csv", 403)] {
        let url = format!("{}/{file}", mock_server.uri());
        match fetcher().fetch(&url).await {
            Err(IngestError::HttpStatus { status, url: failed }) => {
                assert_eq!(status, expected);
                assert_eq!(failed, url);
            },
            other => panic!("expected HTTP {expected}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_fetch_rejects_empty_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/empty.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/empty.csv", mock_server.uri());
    let result = fetcher().fetch(&url).await;
    assert!(matches!(result, Err(IngestError::EmptyBody { .. })));
}

#[tokio::test]
async fn test_fetch_transport_error() {
    // Nothing listens on port 1
    let result = fetcher().fetch("http://127.0.0.1:1/report.csv").await;
    match result {
        Err(err @ IngestError::Transport { .. }) => assert_eq!(err.kind(), "transport_error"),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rest_proxy_connect_checks_topics() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/topics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["storm-reports"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    proxy(&mock_server).connect().await.unwrap();
}

#[tokio::test]
async fn test_rest_proxy_connect_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/topics"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let result = proxy(&mock_server).connect().await;
    assert!(matches!(result, Err(BrokerError::Connect { .. })));
}

#[tokio::test]
async fn test_rest_proxy_produces_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/topics/storm-reports"))
        .and(header("content-type", "application/vnd.kafka.json.v2+json"))
        .and(body_json(json!({
            "records": [
                { "value": { "Time": "1400", "sourceType": "wind" } },
                { "value": { "Time": "1401", "sourceType": "wind" } }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(produce_ok(2)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let messages = vec![
        json!({ "Time": "1400", "sourceType": "wind" }),
        json!({ "Time": "1401", "sourceType": "wind" }),
    ];
    proxy(&mock_server).send("storm-reports", &messages).await.unwrap();
}

#[tokio::test]
async fn test_rest_proxy_rejection_keeps_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/topics/storm-reports"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string(r#"{"error_code":50003,"message":"leader not available"}"#),
        )
        .mount(&mock_server)
        .await;

    let result = proxy(&mock_server).send("storm-reports", &[json!({"a": "b"})]).await;
    match result {
        Err(BrokerError::Rejected { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("leader not available"));
        },
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rest_proxy_partial_record_errors_fail_the_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/topics/storm-reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "offsets": [
                { "partition": 0, "offset": 7, "error_code": null, "error": null },
                { "partition": null, "offset": null, "error_code": 50002, "error": "retriable" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let messages = vec![json!({"a": "1"}), json!({"a": "2"})];
    let result = proxy(&mock_server).send("storm-reports", &messages).await;
    match result {
        Err(BrokerError::RecordErrors { failed, total, first_error }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 2);
            assert_eq!(first_error, "retriable");
        },
        other => panic!("expected record errors, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cycle_from_upstream_to_rest_proxy() {
    let upstream = MockServer::start().await;
    let rest_proxy = MockServer::start().await;
    let tmp = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/reports/240506_rpts_wind.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wind_csv(3)))
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/reports/240506_rpts_torn.csv"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/topics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([PRIMARY_TOPIC, DLQ_TOPIC])))
        .mount(&rest_proxy)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/topics/{PRIMARY_TOPIC}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(produce_ok(2)))
        .expect(2)
        .mount(&rest_proxy)
        .await;

    let mut config = test_config(&[SourceType::Tornado, SourceType::Wind], tmp.path());
    config.source.base_url = format!("{}/reports", upstream.uri());
    config.broker.rest_url = rest_proxy.uri();
    config.batch_size = 2;

    let orchestrator = IngestOrchestrator::new(
        &config,
        Arc::new(fetcher()),
        Arc::new(proxy(&rest_proxy)),
    );

    let summary = orchestrator
        .run_cycle_for(NaiveDate::from_ymd_opt(2024, 5, 6).unwrap())
        .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    let wind = summary.report(SourceType::Wind).unwrap();
    assert_eq!(wind.outcome, SourceOutcome::Completed);
    assert_eq!(wind.records.published, 3);

    let produced: Vec<serde_json::Value> = rest_proxy
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(produced.len(), 2);
    assert_eq!(produced[0]["records"].as_array().unwrap().len(), 2);
    assert_eq!(produced[1]["records"][0]["value"]["Time"], "1402");
    assert_eq!(produced[1]["records"][0]["value"]["sourceType"], "wind");
}
