use dalmux_core::codec::Envelope;
use dalmux_core::protocol::EntityRequest;
use pretty_assertions::assert_eq;
use tests::ServerHarness;

use super::{connect, domain_header, error_kind, ping, post};

#[tokio::test]
async fn test_health_reports_version_and_counts() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;

    let response = reqwest::get(format!("{}/health", listener.address)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let health: serde_json::Value = response.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert!(!health["version"].as_str().unwrap().is_empty());
    assert_eq!(health["sessions"], 0);
    assert_eq!(health["transactions"], 0);
}

#[tokio::test]
async fn test_statistics_list_pools() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);
    assert!(dalmux_core::EntityConnection::is_connected(&mut connection).await);

    let statistics: serde_json::Value = reqwest::get(format!("{}/statistics", listener.address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(statistics["session_count"], 0);
    let pools = statistics["pools"].as_array().unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["username"], "scott");
}

#[tokio::test]
async fn test_missing_credentials_are_rejected() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;

    let (status, json) = post(&listener.address, None, &[domain_header()], ping()).await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(&json), "authentication");
}

#[tokio::test]
async fn test_missing_domain_is_a_bad_request() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;

    let (status, json) = post(&listener.address, Some(("scott", "tiger")), &[], ping()).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&json), "configuration");
}

#[tokio::test]
async fn test_malformed_body_is_a_bad_request() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;

    let (status, json) = post(
        &listener.address,
        Some(("scott", "tiger")),
        &[domain_header()],
        b"{\"version\":1,\"payload\":{\"method\":\"levitate\"}}".to_vec(),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&json), "serialization");
}

#[tokio::test]
async fn test_ping_answers_with_envelope() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;

    let (status, json) = post(
        &listener.address,
        Some(("scott", "tiger")),
        &[domain_header()],
        serde_json::to_vec(&Envelope::new(EntityRequest::Ping)).unwrap(),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(json["version"], dalmux_core::codec::CODEC_VERSION);
    assert_eq!(json["payload"]["ok"]["result"], "unit");
}
