use dalmux_core::{EntityConnection, Error, Value};
use pretty_assertions::assert_eq;
use tests::fixtures::*;
use tests::{scenarios, ServerHarness};

use super::connect;

#[tokio::test]
async fn test_department_lifecycle() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);

    scenarios::department_lifecycle(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_employee_references() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);

    scenarios::employee_references(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_transactions() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);

    scenarios::transactions(&mut connection).await;
    assert!(connection.channel().session().is_none());
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_operations() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);

    scenarios::operations(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_modification_reports_current_row() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut first = connect(&listener.address);
    let mut second = connect(&listener.address);

    let key = first.insert(&department(1, "Sales")).await.unwrap();
    let mut stale = first.select_by_key(&key).await.unwrap();

    let mut fresh = second.select_by_key(&key).await.unwrap();
    fresh.put(&department_location(), "Oslo").unwrap();
    second.update(&fresh).await.unwrap();

    stale.put(&department_name(), "Marketing").unwrap();
    match first.update(&stale).await {
        Err(Error::RowModified { current, .. }) => {
            let current = current.expect("row still exists");
            assert_eq!(current.get(&department_location()), Value::from("Oslo"));
        }
        other => panic!("expected RowModified, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_calls_do_not_open_sessions() {
    let harness = ServerHarness::new();
    let listener = harness.start_http(60_000).await;
    let mut connection = connect(&listener.address);

    assert!(connection.is_connected().await);
    connection.insert(&department(1, "Sales")).await.unwrap();
    assert_eq!(harness.server.session_count(), 0);

    connection.close().await.unwrap();
    assert!(!connection.is_connected().await);
    assert!(matches!(
        connection.select_by_key(&department_key(1)).await,
        Err(Error::Closed)
    ));
}
