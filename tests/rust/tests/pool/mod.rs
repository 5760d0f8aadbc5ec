//! Connection pool integration tests
//!
//! Checkout limits, waiting and per-user pools, driven through local
//! entity connections.

use std::sync::Arc;
use std::time::Duration;

use dalmux_core::{EntityConnection, Error, User};
use dalmux_storage::{LocalEntityConnection, PoolConfig};
use pretty_assertions::assert_eq;
use tests::db::TestDatabase;
use tests::{domain, scott};

fn single_connection(checkout_timeout_ms: u64) -> TestDatabase {
    TestDatabase::with_pool(PoolConfig {
        maximum_size: 1,
        checkout_timeout_ms,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_checkout_fails_when_pool_exhausted() {
    let database = single_connection(100);
    let pool = database.pools.get_or_create(&scott()).unwrap();

    let _held = LocalEntityConnection::new(domain(), pool.as_ref()).await.unwrap();
    let result = LocalEntityConnection::new(domain(), pool.as_ref()).await;
    assert!(matches!(result, Err(Error::PoolExhausted { waited_ms: 100 })));

    let statistics = pool.statistics();
    assert_eq!(statistics.requests, 2);
    assert_eq!(statistics.delayed, 1);
    assert_eq!(statistics.failed, 1);
    assert_eq!(statistics.in_use, 1);
}

#[tokio::test]
async fn test_waiting_checkout_gets_released_connection() {
    let database = single_connection(5_000);
    let pool = database.pools.get_or_create(&scott()).unwrap();

    let mut held = LocalEntityConnection::new(domain(), pool.as_ref()).await.unwrap();

    let waiting_pool = Arc::clone(&pool);
    let waiter = tokio::spawn(async move {
        LocalEntityConnection::new(domain(), waiting_pool.as_ref())
            .await
            .map(|_| ())
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());
    held.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter unblocked")
        .unwrap()
        .unwrap();

    let statistics = pool.statistics();
    assert_eq!(statistics.delayed, 1);
    assert_eq!(statistics.failed, 0);
    // the released connection was reused
    assert_eq!(statistics.created, 1);
}

#[tokio::test]
async fn test_pools_are_per_user() {
    let database = TestDatabase::new();
    let scott_pool = database.pools.get_or_create(&scott()).unwrap();
    let adams_pool = database
        .pools
        .get_or_create(&User::new("adams", "secret"))
        .unwrap();
    assert_eq!(scott_pool.user().username(), "scott");
    assert_eq!(adams_pool.user().username(), "adams");

    assert!(matches!(
        database.pools.get_or_create(&User::new("scott", "wrong")),
        Err(Error::Authentication(_))
    ));

    let mut connection = LocalEntityConnection::new(domain(), adams_pool.as_ref())
        .await
        .unwrap();
    assert_eq!(connection.user().username(), "adams");
    connection.close().await.unwrap();

    let usernames: Vec<String> = database
        .pools
        .statistics()
        .into_iter()
        .map(|s| s.username)
        .collect();
    assert_eq!(usernames, vec!["adams".to_string(), "scott".to_string()]);
}

#[tokio::test]
async fn test_closed_pools_refuse_checkouts() {
    let database = TestDatabase::new();
    let pool = database.pools.get_or_create(&scott()).unwrap();
    let mut connection = LocalEntityConnection::new(domain(), pool.as_ref()).await.unwrap();
    connection.close().await.unwrap();

    database.pools.close_all();
    assert!(!database.pools.contains("scott"));
    assert!(matches!(
        LocalEntityConnection::new(domain(), pool.as_ref()).await,
        Err(Error::Closed)
    ));
}
