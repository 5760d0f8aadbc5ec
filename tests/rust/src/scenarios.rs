//! Scenarios shared by the local, remote and HTTP suites; every transport
//! has to behave exactly like a local connection.

use dalmux_core::{Condition, EntityConnection, Error, Select, Value};
use pretty_assertions::assert_eq;

use crate::fixtures::*;

/// Insert, read, update and delete the Sales department
pub async fn department_lifecycle(connection: &mut dyn EntityConnection) {
    let key = connection.insert(&department(1, "Sales")).await.unwrap();
    assert_eq!(key, department_key(1));

    let sales = connection.select_by_key(&key).await.unwrap();
    assert_eq!(sales.get(&department_name()), Value::from("Sales"));
    assert_eq!(sales.get(&department_location()), Value::Null);
    assert!(!sales.is_modified());
    assert_eq!(connection.count(&Condition::all(&department_type())).await.unwrap(), 1);

    let mut marketing = sales.clone();
    marketing.put(&department_name(), "Marketing").unwrap();
    marketing.put(&department_location(), "Oslo").unwrap();
    let updated = connection.update(&marketing).await.unwrap();
    assert_eq!(updated.get(&department_name()), Value::from("Marketing"));
    assert!(!updated.is_modified());

    // nothing changed since the update
    assert!(matches!(
        connection.update(&updated).await,
        Err(Error::NothingToUpdate(_))
    ));

    connection.delete(&key).await.unwrap();
    let remaining = connection
        .select(&Condition::key(&key).unwrap())
        .await
        .unwrap();
    assert!(remaining.is_empty());
    assert!(matches!(connection.select_by_key(&key).await, Err(Error::NotFound)));
    assert!(matches!(
        connection.delete(&key).await,
        Err(Error::RowCountMismatch { expected: 1, actual: 0 })
    ));
}

/// Employees reference their department and get database generated keys
pub async fn employee_references(connection: &mut dyn EntityConnection) {
    let research = department(10, "Research");
    connection.insert(&research).await.unwrap();

    let keys = connection
        .insert_all(&[
            employee("Adams", 1100.0, &research),
            employee("Blake", 2850.0, &research),
        ])
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
    assert!(matches!(keys[0].value(), Some(Value::Integer(_))));

    let adams = connection.select_by_key(&keys[0]).await.unwrap();
    assert_eq!(adams.get(&employee_name()), Value::from("Adams"));
    let department = adams.referenced_entity(&employee_department()).unwrap();
    assert_eq!(department.get(&department_name()), Value::from("Research"));

    let select = Select::new(
        Condition::attribute(&employee_salary())
            .greater_than(2000.0)
            .unwrap(),
    );
    let well_paid = connection.query(&select).await.unwrap();
    assert_eq!(well_paid.len(), 1);
    assert_eq!(well_paid[0].get(&employee_name()), Value::from("Blake"));

    let names = connection
        .select_values(&employee_name(), &Condition::all(&employee_type()))
        .await
        .unwrap();
    assert_eq!(names, vec![Value::from("Adams"), Value::from("Blake")]);

    let single = connection
        .select_single(
            &Condition::attribute(&employee_name())
                .like("A%")
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(single.key().unwrap(), keys[0]);
    assert!(matches!(
        connection
            .select_single(&Condition::all(&employee_type()))
            .await,
        Err(Error::MultipleResults(2))
    ));

    let deleted = connection
        .delete_where(&Condition::all(&employee_type()))
        .await
        .unwrap();
    assert_eq!(deleted, 2);
}

/// Explicit transactions commit or roll back everything done inside them
pub async fn transactions(connection: &mut dyn EntityConnection) {
    let all = Condition::all(&department_type());
    assert!(!connection.is_transaction_open().await.unwrap());

    connection.begin_transaction().await.unwrap();
    assert!(connection.is_transaction_open().await.unwrap());
    assert!(matches!(
        connection.begin_transaction().await,
        Err(Error::Transaction(_))
    ));
    connection.insert(&department(20, "Operations")).await.unwrap();
    assert_eq!(connection.count(&all).await.unwrap(), 1);
    connection.rollback_transaction().await.unwrap();
    assert_eq!(connection.count(&all).await.unwrap(), 0);

    connection.begin_transaction().await.unwrap();
    connection.insert(&department(20, "Operations")).await.unwrap();
    // a failure inside an explicit transaction leaves it open
    assert!(connection.insert(&department(20, "Duplicate")).await.is_err());
    assert!(connection.is_transaction_open().await.unwrap());
    connection.commit_transaction().await.unwrap();

    assert_eq!(connection.count(&all).await.unwrap(), 1);
    assert!(matches!(
        connection.commit_transaction().await,
        Err(Error::Transaction(_))
    ));
}

/// Functions, procedures and reports registered with the server
pub async fn operations(connection: &mut dyn EntityConnection) {
    connection.insert(&department(30, "Sales")).await.unwrap();
    connection.insert(&department(40, "Research")).await.unwrap();

    let count = connection
        .execute_function("department_count", &[])
        .await
        .unwrap();
    assert_eq!(count, Value::Integer(2));

    connection
        .execute_procedure("relocate_all", &[Value::from("Dallas")])
        .await
        .unwrap();
    let locations = connection
        .select_values(&department_location(), &Condition::all(&department_type()))
        .await
        .unwrap();
    // distinct values only
    assert_eq!(locations, vec![Value::from("Dallas")]);

    let report = connection.fill_report("locations", &[]).await.unwrap();
    assert_eq!(report, Value::from("Research@Dallas\nSales@Dallas"));

    assert!(matches!(
        connection.execute_function("missing", &[]).await,
        Err(Error::UnknownOperation(_))
    ));
    assert!(matches!(
        connection.fill_report("missing", &[]).await,
        Err(Error::UnknownOperation(_))
    ));
}
