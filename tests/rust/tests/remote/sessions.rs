use dalmux_core::{Condition, EntityConnection, Error, User};
use dalmux_gateway::{password_digest, LoginUser, SessionConfig};
use dalmux_storage::PoolConfig;
use pretty_assertions::assert_eq;
use tests::fixtures::*;
use tests::{scott, ServerHarness};

use super::{connect, request, try_connect};

#[tokio::test]
async fn test_session_lives_until_close() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    let client_id = connection.channel().client_id();
    assert!(!connection.channel().server_version().is_empty());
    assert_eq!(harness.server.session_count(), 1);
    let session = harness.server.session(&client_id).unwrap();
    assert_eq!(session.client().user(), &scott());
    assert_eq!(session.client().client_type(), super::CLIENT_TYPE);
    assert!(session.client().client_host().is_some());

    assert!(connection.is_connected().await);
    connection.close().await.unwrap();
    assert!(!connection.is_connected().await);
    assert_eq!(harness.server.session_count(), 0);
    assert!(matches!(
        connection.count(&Condition::all(&department_type())).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_login_proxy_rejects_bad_credentials() {
    let users = [LoginUser {
        username: "scott".to_string(),
        password_sha256: password_digest("tiger"),
    }];
    let harness = ServerHarness::with_users(SessionConfig::default(), PoolConfig::default(), &users);
    let listener = harness.start_remote().await;

    let rejected = try_connect(&listener.address, request(User::new("scott", "lion"))).await;
    assert!(matches!(rejected, Err(Error::Authentication(_))));
    let unknown = try_connect(&listener.address, request(User::new("king", "tiger"))).await;
    assert!(matches!(unknown, Err(Error::Authentication(_))));
    assert_eq!(harness.server.session_count(), 0);

    let mut connection = connect(&listener.address).await;
    assert_eq!(harness.server.session_count(), 1);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_domain_is_rejected() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;

    let mut elsewhere = request(scott());
    elsewhere.domain = "nowhere".to_string();
    assert!(matches!(
        try_connect(&listener.address, elsewhere).await,
        Err(Error::Configuration(_))
    ));
}

#[tokio::test]
async fn test_connection_limit() {
    let sessions = SessionConfig {
        connection_limit: 1,
        ..Default::default()
    };
    let harness = ServerHarness::with_config(sessions, PoolConfig::default());
    let listener = harness.start_remote().await;

    let mut first = connect(&listener.address).await;
    assert!(matches!(
        try_connect(&listener.address, request(scott())).await,
        Err(Error::Authentication(_))
    ));

    first.close().await.unwrap();
    let mut second = connect(&listener.address).await;
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_resumes_session() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;

    let mut first = connect(&listener.address).await;
    first.begin_transaction().await.unwrap();
    first.insert(&department(1, "Sales")).await.unwrap();
    let client_id = first.channel().client_id();
    // socket goes away without a disconnect
    drop(first);
    assert_eq!(harness.server.session_count(), 1);

    let mut second = try_connect(&listener.address, request(scott()).with_client_id(client_id))
        .await
        .unwrap();
    assert_eq!(second.channel().client_id(), client_id);
    assert_eq!(harness.server.session_count(), 1);
    // same server side connection, the transaction is still open
    assert!(second.is_transaction_open().await.unwrap());
    second.commit_transaction().await.unwrap();
    assert_eq!(
        second.count(&Condition::all(&department_type())).await.unwrap(),
        1
    );

    let mut impostor = request(User::new("adams", "secret")).with_client_id(client_id);
    impostor.client_type = "other".to_string();
    assert!(matches!(
        try_connect(&listener.address, impostor).await,
        Err(Error::Authentication(_))
    ));

    second.close().await.unwrap();
    assert_eq!(harness.server.session_count(), 0);
}

#[tokio::test]
async fn test_idle_sessions_are_reaped() {
    let sessions = SessionConfig {
        idle_timeout_ms: 0,
        ..Default::default()
    };
    let harness = ServerHarness::with_config(sessions, PoolConfig::default());
    let listener = harness.start_remote().await;

    let mut connection = connect(&listener.address).await;
    connection.begin_transaction().await.unwrap();
    connection.insert(&department(1, "Sales")).await.unwrap();

    assert_eq!(harness.server.reap_idle().await, 1);
    assert_eq!(harness.server.session_count(), 0);

    // the session is gone, the open transaction was rolled back
    assert!(matches!(
        connection.count(&Condition::all(&department_type())).await,
        Err(Error::Closed)
    ));
    let mut fresh = connect(&listener.address).await;
    assert_eq!(
        fresh.count(&Condition::all(&department_type())).await.unwrap(),
        0
    );
    fresh.close().await.unwrap();
}
