//! Local connection integration tests
//!
//! Entity operations straight against a temporary SQLite file.

mod locking;
mod scenarios;

use std::sync::Arc;

use dalmux_core::EntityConnection;
use dalmux_storage::LocalEntityConnection;
use tests::db::TestDatabase;
use tests::servers::operations;
use tests::{domain, scott};

pub async fn connect(database: &TestDatabase) -> LocalEntityConnection {
    let pool = database.pools.get_or_create(&scott()).unwrap();
    let connection = LocalEntityConnection::new(domain(), pool.as_ref())
        .await
        .unwrap()
        .with_operations(Arc::new(operations()));
    assert!(connection.is_optimistic_locking());
    connection
}

#[tokio::test]
async fn test_close_releases_connection() {
    let database = TestDatabase::new();
    let mut connection = connect(&database).await;
    assert!(connection.is_connected().await);

    connection.close().await.unwrap();
    assert!(!connection.is_connected().await);
    // closing twice is harmless
    connection.close().await.unwrap();

    let statistics = database.pools.statistics();
    assert_eq!(statistics[0].in_use, 0);
}
