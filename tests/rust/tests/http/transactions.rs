use std::time::Duration;

use dalmux_core::protocol::{CLIENT_ID_HEADER, SESSION_HEADER};
use dalmux_core::{Condition, EntityConnection, Error, User};
use dalmux_gateway::SessionConfig;
use dalmux_storage::PoolConfig;
use pretty_assertions::assert_eq;
use tests::fixtures::*;
use tests::ServerHarness;

use super::{connect, connect_as, domain_header, error_kind, pinned_transactions, ping, post};

#[tokio::test]
async fn test_transaction_is_pinned_until_commit() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut writer = connect(&listener.address);
    let mut reader = connect(&listener.address);
    let all = Condition::all(&department_type());

    writer.begin_transaction().await.unwrap();
    let session = writer.channel().session().map(str::to_string);
    assert!(session.is_some());
    assert_eq!(pinned_transactions(&listener.address).await, 1);

    writer.insert(&department(1, "Sales")).await.unwrap();
    assert_eq!(writer.channel().session().map(str::to_string), session);
    assert_eq!(writer.count(&all).await.unwrap(), 1);
    // uncommitted work stays invisible to other clients
    assert_eq!(reader.count(&all).await.unwrap(), 0);

    writer.commit_transaction().await.unwrap();
    assert!(writer.channel().session().is_none());
    assert_eq!(pinned_transactions(&listener.address).await, 0);
    assert_eq!(reader.count(&all).await.unwrap(), 1);
}

#[tokio::test]
async fn test_close_rolls_back_open_transaction() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut writer = connect(&listener.address);

    writer.begin_transaction().await.unwrap();
    writer.insert(&department(1, "Sales")).await.unwrap();
    writer.close().await.unwrap();
    assert_eq!(pinned_transactions(&listener.address).await, 0);

    let mut reader = connect(&listener.address);
    assert_eq!(reader.count(&Condition::all(&department_type())).await.unwrap(), 0);
}

#[tokio::test]
async fn test_idle_transaction_expires() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(200).await;
    let mut writer = connect(&listener.address);
    let all = Condition::all(&department_type());

    writer.begin_transaction().await.unwrap();
    writer.insert(&department(1, "Sales")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(pinned_transactions(&listener.address).await, 0);

    assert!(matches!(writer.count(&all).await, Err(Error::Transaction(_))));
    assert!(writer.channel().session().is_none());
    // the next call runs stateless and sees the rolled back state
    assert_eq!(writer.count(&all).await.unwrap(), 0);
    assert!(!writer.is_transaction_open().await.unwrap());
}

#[tokio::test]
async fn test_pinned_transaction_holds_its_connection() {
    let pool = PoolConfig {
        maximum_size: 1,
        checkout_timeout_ms: 100,
        ..Default::default()
    };
    let harness = ServerHarness::with_config(SessionConfig::default(), pool);
    let listener = harness.start_http(60_000).await;
    let mut writer = connect(&listener.address);
    let mut reader = connect(&listener.address);
    let all = Condition::all(&department_type());

    writer.begin_transaction().await.unwrap();
    writer.insert(&department(1, "Sales")).await.unwrap();
    assert!(matches!(
        reader.count(&all).await,
        Err(Error::PoolExhausted { .. })
    ));

    writer.commit_transaction().await.unwrap();
    assert_eq!(reader.count(&all).await.unwrap(), 1);
}

#[tokio::test]
async fn test_session_tokens_are_checked() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut writer = connect(&listener.address);
    writer.begin_transaction().await.unwrap();
    let token = writer.channel().session().unwrap().to_string();

    let (status, json) = post(
        &listener.address,
        Some(("scott", "tiger")),
        &[domain_header(), (SESSION_HEADER, "forged")],
        ping(),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);
    assert_eq!(error_kind(&json), "transaction");

    // a valid token presented by another client
    let (status, json) = post(
        &listener.address,
        Some(("adams", "secret")),
        &[domain_header(), (SESSION_HEADER, token.as_str())],
        ping(),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(&json), "authentication");

    // the same user but a different client id
    let other_client = uuid::Uuid::new_v4().to_string();
    let (status, _) = post(
        &listener.address,
        Some(("scott", "tiger")),
        &[
            domain_header(),
            (SESSION_HEADER, token.as_str()),
            (CLIENT_ID_HEADER, other_client.as_str()),
        ],
        ping(),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);

    assert_eq!(pinned_transactions(&listener.address).await, 1);
    writer.rollback_transaction().await.unwrap();
    assert_eq!(pinned_transactions(&listener.address).await, 0);

    let mut adams = connect_as(&listener.address, User::new("adams", "secret"));
    assert!(adams.is_connected().await);
}
