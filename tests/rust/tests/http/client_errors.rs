//! Client side handling of responses from a mocked server

use dalmux_core::codec::CODEC_VERSION;
use dalmux_core::protocol::{DOMAIN_HEADER, SESSION_HEADER};
use dalmux_core::{Condition, EntityConnection, Error};
use serde_json::json;
use tests::fixtures::*;
use tests::DOMAIN;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::connect;

fn outcome(payload: serde_json::Value) -> serde_json::Value {
    json!({ "version": CODEC_VERSION, "payload": payload })
}

#[tokio::test]
async fn test_unauthorized_without_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .mount(&server)
        .await;

    let mut connection = connect(&server.uri());
    assert!(matches!(
        connection.count(&Condition::all(&department_type())).await,
        Err(Error::Authentication(_))
    ));
}

#[tokio::test]
async fn test_unexpected_body_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let mut connection = connect(&server.uri());
    assert!(matches!(
        connection.count(&Condition::all(&department_type())).await,
        Err(Error::Transport(_))
    ));
}

#[tokio::test]
async fn test_server_errors_are_rebuilt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .and(header(DOMAIN_HEADER, DOMAIN))
        .and(header_exists("authorization"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(outcome(json!({ "err": { "error": "not_found" } }))),
        )
        .mount(&server)
        .await;

    let mut connection = connect(&server.uri());
    assert!(matches!(
        connection.select_by_key(&department_key(1)).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn test_codec_version_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": CODEC_VERSION + 1,
            "payload": { "ok": { "result": "unit" } }
        })))
        .mount(&server)
        .await;

    let mut connection = connect(&server.uri());
    assert!(matches!(
        connection.begin_transaction().await,
        Err(Error::Serialization(_))
    ));
}

#[tokio::test]
async fn test_session_header_is_sent_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .and(header(SESSION_HEADER, "pinned"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SESSION_HEADER, "pinned")
                .set_body_json(outcome(json!({ "ok": { "result": "count", "value": 3 } }))),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/entities"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SESSION_HEADER, "pinned")
                .set_body_json(outcome(json!({ "ok": { "result": "unit" } }))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut connection = connect(&server.uri());
    connection.begin_transaction().await.unwrap();
    assert_eq!(connection.channel().session(), Some("pinned"));
    assert_eq!(
        connection.count(&Condition::all(&department_type())).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut connection = connect(&address);
    assert!(matches!(
        connection.count(&Condition::all(&department_type())).await,
        Err(Error::Transport(_))
    ));
    assert!(!connection.is_connected().await);
}
