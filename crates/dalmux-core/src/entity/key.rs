use std::fmt;

use crate::domain::{Attribute, EntityDefinition, EntityType};
use crate::error::{Error, Result, ValidationError, ValidationKind};
use crate::value::Value;

/// Primary key projection of an entity.
///
/// Values are kept sorted by attribute name, so two keys are equal exactly when
/// their entity type and key values are equal, however they were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    entity_type: EntityType,
    values: Vec<(Attribute, Value)>,
}

impl Key {
    /// Key of a type with a single primary key column
    pub fn of(definition: &EntityDefinition, value: impl Into<Value>) -> Result<Self> {
        let mut columns = definition.primary_key();
        let (Some(column), None) = (columns.next(), columns.next()) else {
            return Err(Error::Configuration(format!(
                "{} does not have a single column primary key",
                definition.entity_type()
            )));
        };
        Self::composite(definition, [(column.attribute().clone(), value.into())])
    }

    /// Key from explicit primary key values; every key column must be given and non-null
    pub fn composite(
        definition: &EntityDefinition,
        values: impl IntoIterator<Item = (Attribute, Value)>,
    ) -> Result<Self> {
        let values: Vec<(Attribute, Value)> = values.into_iter().collect();

        for (attribute, value) in &values {
            let column = definition.definition_of(attribute)?;
            if !column.is_primary_key() {
                return Err(Error::Configuration(format!(
                    "{} is not a primary key attribute",
                    attribute
                )));
            }
            if !value.fits(attribute.value_type()) {
                return Err(ValidationError::new(
                    ValidationKind::TypeMismatch,
                    attribute,
                    value.clone(),
                    format!("expected a value of type {}", attribute.value_type()),
                )
                .into());
            }
        }

        for column in definition.primary_key() {
            let present = values
                .iter()
                .any(|(a, v)| a.name() == column.name() && !v.is_null());
            if !present {
                return Err(ValidationError::new(
                    ValidationKind::NullNotAllowed,
                    column.attribute(),
                    Value::Null,
                    "primary key value is not set",
                )
                .into());
            }
        }

        if values.len() != definition.primary_key().count() {
            return Err(Error::Configuration(format!(
                "too many key values for {}",
                definition.entity_type()
            )));
        }

        Ok(Self::from_parts(definition.entity_type().clone(), values))
    }

    pub(crate) fn from_parts(entity_type: EntityType, mut values: Vec<(Attribute, Value)>) -> Self {
        values.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        Self {
            entity_type,
            values,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn values(&self) -> &[(Attribute, Value)] {
        &self.values
    }

    /// Value of the named key attribute
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(a, _)| a.name() == name)
            .map(|(_, v)| v)
    }

    /// The value of a single column key
    pub fn value(&self) -> Option<&Value> {
        match self.values.as_slice() {
            [(_, value)] => Some(value),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.values.len() > 1
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.entity_type.name())?;
        for (i, (attribute, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attribute.name(), value)?;
        }
        f.write_str("]")
    }
}
