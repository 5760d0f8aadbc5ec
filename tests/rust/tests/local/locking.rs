use dalmux_core::{EntityConnection, Error, Value};
use pretty_assertions::assert_eq;
use tests::db::TestDatabase;
use tests::fixtures::*;

use super::connect;

#[tokio::test]
async fn test_update_of_concurrently_modified_row_fails() {
    let database = TestDatabase::new();
    let mut first = connect(&database).await;
    let mut second = connect(&database).await;

    let key = first.insert(&department(1, "Sales")).await.unwrap();
    let mut stale = first.select_by_key(&key).await.unwrap();

    let mut fresh = second.select_by_key(&key).await.unwrap();
    fresh.put(&department_location(), "Boston").unwrap();
    second.update(&fresh).await.unwrap();

    stale.put(&department_name(), "Marketing").unwrap();
    match first.update(&stale).await {
        Err(Error::RowModified { entity, current }) => {
            assert_eq!(entity.get(&department_name()), Value::from("Marketing"));
            let current = current.expect("row still exists");
            assert_eq!(current.get(&department_location()), Value::from("Boston"));
            assert_eq!(current.get(&department_name()), Value::from("Sales"));
        }
        other => panic!("expected RowModified, got {:?}", other),
    }

    // nothing was written by the failed update
    let stored = second.select_by_key(&key).await.unwrap();
    assert_eq!(stored.get(&department_name()), Value::from("Sales"));
}

#[tokio::test]
async fn test_update_of_deleted_row_fails() {
    let database = TestDatabase::new();
    let mut first = connect(&database).await;
    let mut second = connect(&database).await;

    let key = first.insert(&department(2, "Research")).await.unwrap();
    let mut stale = first.select_by_key(&key).await.unwrap();
    second.delete(&key).await.unwrap();

    stale.put(&department_name(), "Development").unwrap();
    assert!(matches!(
        first.update(&stale).await,
        Err(Error::RowModified { current: None, .. })
    ));
}

#[tokio::test]
async fn test_last_writer_wins_without_optimistic_locking() {
    let database = TestDatabase::new();
    let mut first = connect(&database).await.with_optimistic_locking(false);
    let mut second = connect(&database).await;

    let key = first.insert(&department(3, "Operations")).await.unwrap();
    let mut stale = first.select_by_key(&key).await.unwrap();

    let mut fresh = second.select_by_key(&key).await.unwrap();
    fresh.put(&department_location(), "Chicago").unwrap();
    second.update(&fresh).await.unwrap();

    stale.put(&department_name(), "Logistics").unwrap();
    let updated = first.update(&stale).await.unwrap();
    assert_eq!(updated.get(&department_name()), Value::from("Logistics"));
    // only modified columns are written
    assert_eq!(updated.get(&department_location()), Value::from("Chicago"));
}
