//! Condition algebra
//!
//! Conditions are immutable predicate trees validated when they are built:
//! an operator given the wrong number of values, a value of the wrong type,
//! or a combination of conditions on different entity types never reaches a
//! transport.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Attribute, EntityType};
use crate::entity::Key;
use crate::error::ConditionError;
use crate::value::{Value, ValueType};

type ConditionResult<T> = std::result::Result<T, ConditionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Between,
    NotBetween,
    BetweenExclusive,
    NotBetweenExclusive,
    Like,
    NotLike,
}

impl Operator {
    fn is_between(&self) -> bool {
        matches!(
            self,
            Operator::Between
                | Operator::NotBetween
                | Operator::BetweenExclusive
                | Operator::NotBetweenExclusive
        )
    }

    fn is_like(&self) -> bool {
        matches!(self, Operator::Like | Operator::NotLike)
    }

    /// Check the value count and nullness accepted by this operator
    fn check_values(&self, values: &[Value]) -> ConditionResult<()> {
        let count_error = |expected: &str| ConditionError::ValueCount {
            operator: *self,
            expected: expected.to_string(),
            actual: values.len(),
        };
        let has_null = values.iter().any(Value::is_null);

        match self {
            Operator::Equal | Operator::NotEqual => {
                if values.is_empty() {
                    return Err(count_error("one or more"));
                }
                // Null only as a single value, meaning IS [NOT] NULL
                if has_null && values.len() > 1 {
                    return Err(ConditionError::NullValue { operator: *self });
                }
            }
            op if op.is_between() => {
                if values.len() != 2 {
                    return Err(count_error("exactly two"));
                }
                if has_null {
                    return Err(ConditionError::NullValue { operator: *self });
                }
            }
            _ => {
                if values.len() != 1 {
                    return Err(count_error("exactly one"));
                }
                if has_null {
                    return Err(ConditionError::NullValue { operator: *self });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Between => "between",
            Operator::NotBetween => "not between",
            Operator::BetweenExclusive => "between exclusive",
            Operator::NotBetweenExclusive => "not between exclusive",
            Operator::Like => "like",
            Operator::NotLike => "not like",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conjunction {
    And,
    Or,
}

/// Leaf condition: one attribute, one operator, its values.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeCondition {
    attribute: Attribute,
    operator: Operator,
    values: Vec<Value>,
    case_sensitive: bool,
}

impl AttributeCondition {
    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// `EQUAL null` / `NOT_EQUAL null`
    pub fn is_null_check(&self) -> bool {
        matches!(self.values.as_slice(), [Value::Null])
    }
}

/// Branch condition: children joined by one conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    conjunction: Conjunction,
    conditions: Vec<Condition>,
}

impl Combination {
    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// A predicate over one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches every row of the type
    All(EntityType),
    Attribute(AttributeCondition),
    Combination(Combination),
}

impl Condition {
    /// Matches all rows
    pub fn all(entity_type: &EntityType) -> Self {
        Condition::All(entity_type.clone())
    }

    /// Start a condition on `attribute`
    pub fn attribute(attribute: &Attribute) -> AttributeConditionBuilder {
        AttributeConditionBuilder {
            attribute: attribute.clone(),
            case_sensitive: true,
        }
    }

    /// Build a leaf condition, validating operator, value count and value types
    pub fn new(
        attribute: &Attribute,
        operator: Operator,
        values: Vec<Value>,
        case_sensitive: bool,
    ) -> ConditionResult<Self> {
        let value_type = attribute.value_type();
        if matches!(value_type, ValueType::Entity) {
            return Err(ConditionError::UnsupportedAttribute {
                attribute: attribute.to_string(),
                value_type,
            });
        }

        operator.check_values(&values)?;

        let expected = if operator.is_like() {
            ValueType::Text
        } else {
            value_type
        };
        for value in &values {
            if !value.fits(expected) {
                return Err(ConditionError::TypeMismatch {
                    attribute: attribute.to_string(),
                    expected,
                    actual: value.value_type().unwrap_or(expected),
                });
            }
        }

        Ok(Condition::Attribute(AttributeCondition {
            attribute: attribute.clone(),
            operator,
            values,
            case_sensitive,
        }))
    }

    /// Condition matching the row identified by `key`
    pub fn key(key: &Key) -> ConditionResult<Self> {
        let conditions = key
            .values()
            .iter()
            .map(|(attribute, value)| {
                Condition::new(attribute, Operator::Equal, vec![value.clone()], true)
            })
            .collect::<ConditionResult<Vec<_>>>()?;
        Self::combine(Conjunction::And, conditions)
    }

    /// Condition matching any of `keys`; single column keys become one IN condition
    pub fn keys(keys: &[Key]) -> ConditionResult<Self> {
        let first = keys
            .first()
            .ok_or_else(|| ConditionError::Empty {
                what: "key".to_string(),
            })?;

        if let Some(other) = keys.iter().find(|k| k.entity_type() != first.entity_type()) {
            return Err(ConditionError::MixedEntityTypes {
                first: first.entity_type().to_string(),
                second: other.entity_type().to_string(),
            });
        }

        if !first.is_composite() {
            let (attribute, _) = &first.values()[0];
            let values = keys
                .iter()
                .filter_map(|k| k.value().cloned())
                .collect::<Vec<_>>();
            return Condition::new(attribute, Operator::Equal, values, true);
        }

        let conditions = keys
            .iter()
            .map(Condition::key)
            .collect::<ConditionResult<Vec<_>>>()?;
        Self::combine(Conjunction::Or, conditions)
    }

    /// Join conditions with AND; all must be on the same entity type
    pub fn and_all(conditions: Vec<Condition>) -> ConditionResult<Self> {
        Self::combine(Conjunction::And, conditions)
    }

    /// Join conditions with OR; all must be on the same entity type
    pub fn or_all(conditions: Vec<Condition>) -> ConditionResult<Self> {
        Self::combine(Conjunction::Or, conditions)
    }

    pub fn and(self, other: Condition) -> ConditionResult<Self> {
        Self::combine(Conjunction::And, vec![self, other])
    }

    pub fn or(self, other: Condition) -> ConditionResult<Self> {
        Self::combine(Conjunction::Or, vec![self, other])
    }

    /// Combine conditions. A single condition is returned as is.
    pub fn combine(conjunction: Conjunction, mut conditions: Vec<Condition>) -> ConditionResult<Self> {
        let first = conditions
            .first()
            .ok_or_else(|| ConditionError::Empty {
                what: "condition".to_string(),
            })?;
        let entity_type = first.entity_type().clone();

        if let Some(other) = conditions.iter().find(|c| c.entity_type() != &entity_type) {
            return Err(ConditionError::MixedEntityTypes {
                first: entity_type.to_string(),
                second: other.entity_type().to_string(),
            });
        }

        if conditions.len() == 1 {
            return Ok(conditions.remove(0));
        }

        Ok(Condition::Combination(Combination {
            conjunction,
            conditions,
        }))
    }

    pub fn entity_type(&self) -> &EntityType {
        match self {
            Condition::All(entity_type) => entity_type,
            Condition::Attribute(condition) => condition.attribute.entity_type(),
            Condition::Combination(combination) => combination.conditions[0].entity_type(),
        }
    }

    /// All leaf values in tree order
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Condition::All(_) => Vec::new(),
            Condition::Attribute(condition) => condition.values.iter().collect(),
            Condition::Combination(combination) => combination
                .conditions
                .iter()
                .flat_map(|c| c.values())
                .collect(),
        }
    }
}

impl From<&EntityType> for Condition {
    fn from(entity_type: &EntityType) -> Self {
        Condition::all(entity_type)
    }
}

/// Fluent construction of leaf conditions.
pub struct AttributeConditionBuilder {
    attribute: Attribute,
    case_sensitive: bool,
}

impl AttributeConditionBuilder {
    /// Make text comparisons case insensitive
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    fn build(self, operator: Operator, values: Vec<Value>) -> ConditionResult<Condition> {
        Condition::new(&self.attribute, operator, values, self.case_sensitive)
    }

    pub fn equal_to(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::Equal, vec![value.into()])
    }

    /// IN-set; fails when `values` is empty
    pub fn in_values<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::Equal, values.into_iter().map(Into::into).collect())
    }

    pub fn not_equal_to(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::NotEqual, vec![value.into()])
    }

    pub fn not_in_values<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::NotEqual, values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(self) -> ConditionResult<Condition> {
        self.build(Operator::Equal, vec![Value::Null])
    }

    pub fn is_not_null(self) -> ConditionResult<Condition> {
        self.build(Operator::NotEqual, vec![Value::Null])
    }

    pub fn less_than(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::LessThan, vec![value.into()])
    }

    pub fn less_than_or_equal(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::LessThanOrEqual, vec![value.into()])
    }

    pub fn greater_than(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::GreaterThan, vec![value.into()])
    }

    pub fn greater_than_or_equal(self, value: impl Into<Value>) -> ConditionResult<Condition> {
        self.build(Operator::GreaterThanOrEqual, vec![value.into()])
    }

    pub fn between(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::Between, vec![lower.into(), upper.into()])
    }

    pub fn between_exclusive(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::BetweenExclusive, vec![lower.into(), upper.into()])
    }

    pub fn not_between(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::NotBetween, vec![lower.into(), upper.into()])
    }

    pub fn not_between_exclusive(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> ConditionResult<Condition> {
        self.build(Operator::NotBetweenExclusive, vec![lower.into(), upper.into()])
    }

    /// SQL LIKE pattern (`%` and `_` wildcards)
    pub fn like(self, pattern: impl Into<String>) -> ConditionResult<Condition> {
        self.build(Operator::Like, vec![Value::Text(pattern.into())])
    }

    pub fn not_like(self, pattern: impl Into<String>) -> ConditionResult<Condition> {
        self.build(Operator::NotLike, vec![Value::Text(pattern.into())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub attribute: Attribute,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(attribute: &Attribute) -> Self {
        Self {
            attribute: attribute.clone(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(attribute: &Attribute) -> Self {
        Self {
            attribute: attribute.clone(),
            direction: Direction::Descending,
        }
    }
}

/// A select query: condition plus ordering, paging and column selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    condition: Condition,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    attributes: Vec<Attribute>,
    for_update: bool,
    fetch_depth: Option<usize>,
}

impl Select {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            attributes: Vec::new(),
            for_update: false,
            fetch_depth: None,
        }
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Restrict the selected columns; primary key columns are always included
    pub fn attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Lock the selected rows until the transaction ends
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// Override the foreign key fetch depth of every foreign key
    pub fn fetch_depth(mut self, depth: usize) -> Self {
        self.fetch_depth = Some(depth);
        self
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn entity_type(&self) -> &EntityType {
        self.condition.entity_type()
    }

    pub fn order_by_list(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn selected_attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn is_for_update(&self) -> bool {
        self.for_update
    }

    pub fn fetch_depth_value(&self) -> Option<usize> {
        self.fetch_depth
    }
}

impl From<Condition> for Select {
    fn from(condition: Condition) -> Self {
        Select::new(condition)
    }
}
