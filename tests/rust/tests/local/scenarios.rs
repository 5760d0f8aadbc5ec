use tests::db::TestDatabase;
use tests::scenarios;

use super::connect;

#[tokio::test]
async fn test_department_lifecycle() {
    let database = TestDatabase::new();
    let mut connection = connect(&database).await;
    scenarios::department_lifecycle(&mut connection).await;
}

#[tokio::test]
async fn test_employee_references() {
    let database = TestDatabase::new();
    let mut connection = connect(&database).await;
    scenarios::employee_references(&mut connection).await;
}

#[tokio::test]
async fn test_transactions() {
    let database = TestDatabase::new();
    let mut connection = connect(&database).await;
    scenarios::transactions(&mut connection).await;
}

#[tokio::test]
async fn test_operations() {
    let database = TestDatabase::new();
    let mut connection = connect(&database).await;
    scenarios::operations(&mut connection).await;
}
