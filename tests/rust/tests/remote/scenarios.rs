use dalmux_core::{EntityConnection, Error, Value};
use pretty_assertions::assert_eq;
use tests::fixtures::*;
use tests::{scenarios, scott, ServerHarness};

use super::connect;

#[tokio::test]
async fn test_department_lifecycle() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    scenarios::department_lifecycle(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_employee_references() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    scenarios::employee_references(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_transactions() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    scenarios::transactions(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_operations() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    scenarios::operations(&mut connection).await;
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_modification_across_clients() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut first = connect(&listener.address).await;
    let mut second = connect(&listener.address).await;

    let key = first.insert(&department(1, "Sales")).await.unwrap();
    let mut stale = first.select_by_key(&key).await.unwrap();

    let mut fresh = second.select_by_key(&key).await.unwrap();
    fresh.put(&department_name(), "Marketing").unwrap();
    second.update(&fresh).await.unwrap();

    stale.put(&department_location(), "Boston").unwrap();
    match first.update(&stale).await {
        Err(Error::RowModified { entity, current }) => {
            assert_eq!(entity.get(&department_location()), Value::from("Boston"));
            let current = current.expect("row still exists");
            assert_eq!(current.get(&department_name()), Value::from("Marketing"));
        }
        other => panic!("expected RowModified, got {:?}", other),
    }

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_validation_error_crosses_the_wire() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    let unnamed = {
        let mut entity = tests::domain().entity(&department_type()).unwrap();
        entity.put(&department_id(), 5).unwrap();
        entity
    };
    match connection.insert(&unnamed).await {
        Err(Error::Validation(error)) => {
            assert_eq!(error.attribute, department_name());
            assert_eq!(error.kind, dalmux_core::ValidationKind::NullNotAllowed);
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert!(connection.is_connected().await);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_update_keeps_unchanged_real_column() {
    let harness = ServerHarness::new();
    let listener = harness.start_remote().await;
    let mut connection = connect(&listener.address).await;

    let research = department(20, "Research");
    connection.insert(&research).await.unwrap();
    let key = connection
        .insert(&employee("Adams", 1100.0, &research))
        .await
        .unwrap();
    let id = key.value().and_then(Value::as_i64).unwrap();

    // a salary with no short decimal form, written behind the server's back
    let salary = 1000.0 + 1.0 / 7.0;
    let database = harness.database.pools.database().connect(&scott()).unwrap();
    database
        .connection()
        .unwrap()
        .execute(
            "UPDATE emp SET salary = ?1 WHERE id = ?2",
            rusqlite::params![salary, id],
        )
        .unwrap();

    let mut adams = connection.select_by_key(&key).await.unwrap();
    assert_eq!(adams.get(&employee_salary()), Value::Real(salary));
    adams.put(&employee_name(), "Allen").unwrap();
    let updated = connection.update(&adams).await.unwrap();
    assert_eq!(updated.get(&employee_name()), Value::from("Allen"));

    let stored: f64 = database
        .connection()
        .unwrap()
        .query_row("SELECT salary FROM emp WHERE id = ?1", [id], |row| row.get(0))
        .unwrap();
    assert_eq!(stored.to_bits(), salary.to_bits());
    connection.close().await.unwrap();
}
