use dalmux_core::codec::{ConditionTree, ValueTree};
use dalmux_core::{Condition, ConditionError, Error, Operator};
use pretty_assertions::assert_eq;
use tests::domain;
use tests::fixtures::*;

#[test]
fn test_condition_values_must_fit_attribute() {
    let error = Condition::attribute(&department_id())
        .equal_to("ten")
        .unwrap_err();
    assert!(matches!(error, ConditionError::TypeMismatch { .. }));

    // like patterns are text whatever the attribute type
    Condition::attribute(&department_id()).like("1%").unwrap();
}

#[test]
fn test_condition_value_counts() {
    let error = Condition::attribute(&department_name())
        .in_values(Vec::<String>::new())
        .unwrap_err();
    assert!(matches!(error, ConditionError::ValueCount { .. }));

    let error = Condition::attribute(&employee_salary())
        .between(100.0, dalmux_core::Value::Null)
        .unwrap_err();
    assert!(matches!(error, ConditionError::NullValue { .. }));
}

#[test]
fn test_foreign_key_not_usable_in_conditions() {
    let error = Condition::attribute(&employee_department())
        .is_null()
        .unwrap_err();
    assert!(matches!(error, ConditionError::UnsupportedAttribute { .. }));
}

#[test]
fn test_conditions_of_different_types_do_not_combine() {
    let by_department = Condition::attribute(&department_name()).equal_to("Sales").unwrap();
    let by_employee = Condition::attribute(&employee_name()).equal_to("Clerk").unwrap();
    assert!(matches!(
        by_department.and(by_employee),
        Err(ConditionError::MixedEntityTypes { .. })
    ));
}

#[test]
fn test_condition_wire_form_is_validated() {
    let condition = Condition::attribute(&department_name())
        .like("S%")
        .unwrap()
        .or(Condition::attribute(&department_id()).between(1, 10).unwrap())
        .unwrap();
    let json = serde_json::to_string(&ConditionTree::from(&condition)).unwrap();
    let tree: ConditionTree = serde_json::from_str(&json).unwrap();
    assert_eq!(tree.into_condition(&domain()).unwrap(), condition);

    let forged = ConditionTree::Attribute {
        attribute: department_id(),
        operator: Operator::Equal,
        values: vec![ValueTree::Text("ten".to_string())],
        case_sensitive: true,
    };
    assert!(matches!(
        forged.into_condition(&domain()),
        Err(Error::Condition(ConditionError::TypeMismatch { .. }))
    ));
}
