use std::collections::BTreeMap;

use dalmux_core::codec::EntityTree;
use dalmux_core::domain::registry;
use dalmux_core::{Error, ValidationError, ValidationKind, Value};
use pretty_assertions::assert_eq;
use tests::fixtures::*;
use tests::{domain, DOMAIN};

fn validation_kind(error: Error) -> ValidationKind {
    match error {
        Error::Validation(ValidationError { kind, .. }) => kind,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_domain_is_registered_once() {
    let first = domain();
    let second = domain();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert!(registry::domain(DOMAIN).is_some());
    assert!(registry::register(dalmux_core::Domain::new(DOMAIN)).is_err());
}

#[test]
fn test_put_rejects_invalid_values() {
    let mut sales = department(1, "Sales");

    let kind = validation_kind(sales.put(&department_name(), "x".repeat(21)).unwrap_err());
    assert_eq!(kind, ValidationKind::LengthExceeded);
    assert_eq!(sales.get(&department_name()), Value::from("Sales"));

    let kind = validation_kind(sales.put(&department_id(), "one").unwrap_err());
    assert_eq!(kind, ValidationKind::TypeMismatch);

    let kind = validation_kind(sales.put(&department_name(), Value::Null).unwrap_err());
    assert_eq!(kind, ValidationKind::NullNotAllowed);

    let mut clerk = employee("Clerk", 1000.0, &sales);
    let kind = validation_kind(clerk.put(&employee_salary(), 20_000.0).unwrap_err());
    assert_eq!(kind, ValidationKind::OutOfRange);
}

#[test]
fn test_validate_requires_mandatory_values() {
    let mut unnamed = domain().entity(&department_type()).unwrap();
    unnamed.put(&department_id(), 7).unwrap();

    let kind = validation_kind(unnamed.validate().unwrap_err());
    assert_eq!(kind, ValidationKind::NullNotAllowed);

    unnamed.put(&department_name(), "Research").unwrap();
    unnamed.validate().unwrap();
}

#[test]
fn test_generated_key_not_required() {
    let sales = department(1, "Sales");
    // employee keys come from the database
    employee("Clerk", 1000.0, &sales).validate().unwrap();
}

#[test]
fn test_foreign_key_sets_reference_columns() {
    let sales = department(10, "Sales");
    let mut clerk = employee("Clerk", 1000.0, &sales);

    assert_eq!(clerk.get_by_name("department_id"), Value::Integer(10));
    assert_eq!(clerk.referenced_key(&employee_department()), Some(department_key(10)));
    assert_eq!(clerk.referenced_entity(&employee_department()), Some(&sales));

    clerk.put(&employee_department(), Value::Null).unwrap();
    assert_eq!(clerk.get_by_name("department_id"), Value::Null);
    assert_eq!(clerk.referenced_key(&employee_department()), None);
}

#[test]
fn test_modification_tracking_on_loaded_entity() {
    let definition = domain().definition(&department_type()).unwrap();
    let mut values = BTreeMap::new();
    values.insert("id".to_string(), Value::Integer(1));
    values.insert("name".to_string(), Value::from("Sales"));
    let mut sales = dalmux_core::Entity::loaded(definition, values);
    assert!(!sales.is_modified());

    sales.put(&department_name(), "Marketing").unwrap();
    assert!(sales.is_modified());
    assert!(sales.is_attribute_modified(&department_name()));
    assert_eq!(sales.original(&department_name()), Value::from("Sales"));

    // putting the original value back clears the modification
    sales.put(&department_name(), "Sales").unwrap();
    assert!(!sales.is_modified());

    sales.put(&department_id(), 2).unwrap();
    assert_eq!(sales.key().unwrap(), department_key(2));
    assert_eq!(sales.original_key().unwrap(), department_key(1));

    sales.revert_all();
    assert!(!sales.is_modified());
    assert_eq!(sales.key().unwrap(), department_key(1));
}

#[test]
fn test_entity_wire_form_keeps_references_and_originals() {
    let definition = domain().definition(&department_type()).unwrap();
    let mut values = BTreeMap::new();
    values.insert("id".to_string(), Value::Integer(1));
    values.insert("name".to_string(), Value::from("Sales"));
    let mut sales = dalmux_core::Entity::loaded(definition, values);
    sales.put(&department_name(), "Marketing").unwrap();

    let clerk = employee("Clerk", 1000.0, &sales);
    let json = serde_json::to_string(&EntityTree::from(&clerk)).unwrap();
    let tree: EntityTree = serde_json::from_str(&json).unwrap();
    let decoded = tree.into_entity(&domain()).unwrap();

    assert_eq!(decoded, clerk);
    let decoded_sales = decoded.referenced_entity(&employee_department()).unwrap();
    assert_eq!(decoded_sales.original(&department_name()), Value::from("Sales"));
    assert!(decoded_sales.is_modified());
}

#[test]
fn test_unknown_attribute_in_wire_form() {
    let json = r#"{"entity_type":{"domain":"integration","name":"department"},"values":{"budget":{"type":"integer","value":1}}}"#;
    let tree: EntityTree = serde_json::from_str(json).unwrap();
    assert!(matches!(
        tree.into_entity(&domain()),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn test_constraints_checked_in_wire_form() {
    let long_name = "x".repeat(500);
    let json = format!(
        r#"{{"entity_type":{{"domain":"integration","name":"department"}},"values":{{"id":{{"type":"integer","value":1}},"name":{{"type":"text","value":"{}"}}}}}}"#,
        long_name
    );
    let tree: EntityTree = serde_json::from_str(&json).unwrap();
    assert_eq!(
        validation_kind(tree.clone().into_entity(&domain()).unwrap_err()),
        ValidationKind::LengthExceeded
    );
    // rows coming back from the database are not re-validated
    let loaded = tree.into_loaded_entity(&domain()).unwrap();
    assert_eq!(loaded.get(&department_name()), Value::Text(long_name));

    let json = r#"{"entity_type":{"domain":"integration","name":"employee"},"values":{"id":{"type":"integer","value":1},"name":{"type":"null"},"salary":{"type":"real","value":12000.5}}}"#;
    let tree: EntityTree = serde_json::from_str(json).unwrap();
    assert_eq!(
        validation_kind(tree.into_entity(&domain()).unwrap_err()),
        ValidationKind::NullNotAllowed
    );
}
