//! Entity instances and their primary keys
//!
//! An [`Entity`] holds the current value of each set attribute plus the
//! original value of every attribute changed since it was loaded. Only
//! attributes whose current value differs from the original are tracked, so
//! `is_modified()` is simply "any originals recorded".

mod key;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub use key::Key;

use crate::domain::{
    Attribute, AttributeDefinition, AttributeKind, EntityDefinition, EntityType, SourceValues,
};
use crate::error::{Error, Result, ValidationError, ValidationKind};
use crate::value::{Value, ValueType};

/// One row of an entity type.
#[derive(Clone)]
pub struct Entity {
    definition: Arc<EntityDefinition>,
    values: BTreeMap<String, Value>,
    originals: BTreeMap<String, Value>,
}

impl Entity {
    /// An empty entity with default values applied
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let values = definition
            .attributes()
            .iter()
            .filter_map(|a| a.default().map(|v| (a.name().to_string(), v.clone())))
            .collect();

        Self {
            definition,
            values,
            originals: BTreeMap::new(),
        }
    }

    /// An unmodified entity holding values loaded from the database
    pub fn loaded(definition: Arc<EntityDefinition>, values: BTreeMap<String, Value>) -> Self {
        Self {
            definition,
            values,
            originals: BTreeMap::new(),
        }
    }

    /// Reassemble an entity from its current and original values
    pub(crate) fn from_parts(
        definition: Arc<EntityDefinition>,
        values: BTreeMap<String, Value>,
        originals: BTreeMap<String, Value>,
    ) -> Self {
        let originals = originals
            .into_iter()
            .filter(|(name, original)| values.get(name).unwrap_or(&Value::Null) != original)
            .collect();

        Self {
            definition,
            values,
            originals,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        self.definition.entity_type()
    }

    pub fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    /// Current value of `attribute`, null when unset.
    ///
    /// Derived attributes are computed on read and are null when any of their
    /// sources is not loaded.
    pub fn get(&self, attribute: &Attribute) -> Value {
        self.get_by_name(attribute.name())
    }

    pub fn get_by_name(&self, name: &str) -> Value {
        if let Some(value) = self.values.get(name) {
            return value.clone();
        }

        match self.definition.attribute_definition(name).map(|d| d.kind()) {
            Some(AttributeKind::Derived { sources, compute }) => {
                let mut resolved = Vec::with_capacity(sources.len());
                for source in sources {
                    match self.values.get(source) {
                        Some(value) => resolved.push((source.as_str(), value)),
                        None => return Value::Null,
                    }
                }
                compute(&SourceValues::new(resolved))
            }
            _ => Value::Null,
        }
    }

    /// Whether a value is held for `attribute` (derived: whether it can be computed)
    pub fn contains(&self, attribute: &Attribute) -> bool {
        match self.definition.attribute_definition(attribute.name()).map(|d| d.kind()) {
            Some(AttributeKind::Derived { sources, .. }) => {
                sources.iter().all(|s| self.values.contains_key(s))
            }
            _ => self.values.contains_key(attribute.name()),
        }
    }

    /// Referenced entity held by a foreign key, if materialized
    pub fn referenced_entity(&self, foreign_key: &Attribute) -> Option<&Entity> {
        self.values
            .get(foreign_key.name())
            .and_then(|v| v.as_entity())
    }

    /// Assign `value` to `attribute`, returning the previous value.
    ///
    /// The value is validated against the attribute definition; nothing is
    /// changed when validation fails. Setting a foreign key to an entity also
    /// sets the underlying reference columns.
    pub fn put(&mut self, attribute: &Attribute, value: impl Into<Value>) -> Result<Value> {
        let definition = Arc::clone(&self.definition);
        let attribute_definition = definition.definition_of(attribute)?;
        let value = coerce(value.into(), attribute_definition.value_type());
        check_value(attribute_definition, &value)?;

        match attribute_definition.kind() {
            AttributeKind::ForeignKey { references, .. } => {
                let referenced = value.as_entity();
                if referenced.is_none() {
                    for (local, _) in references {
                        if let Some(column) = definition.attribute_definition(local) {
                            check_value(column, &Value::Null).map_err(|mut e| {
                                e.attribute = attribute.clone();
                                e
                            })?;
                        }
                    }
                }
                let column_values: Vec<(String, Value)> = references
                    .iter()
                    .map(|(local, target)| {
                        let v = referenced
                            .map(|e| e.get_by_name(target))
                            .unwrap_or(Value::Null);
                        (local.clone(), v)
                    })
                    .collect();
                for (local, v) in column_values {
                    self.set_value(&local, v);
                }
                Ok(self
                    .values
                    .insert(attribute.name().to_string(), value)
                    .unwrap_or_default())
            }
            _ => {
                let previous = self.set_value(attribute.name(), value);
                self.drop_stale_references(attribute.name());
                Ok(previous)
            }
        }
    }

    /// Original value of `attribute`, the current value when unmodified
    pub fn original(&self, attribute: &Attribute) -> Value {
        match self.originals.get(attribute.name()) {
            Some(original) => original.clone(),
            None => self.get(attribute),
        }
    }

    pub fn is_modified(&self) -> bool {
        !self.originals.is_empty()
    }

    pub fn is_attribute_modified(&self, attribute: &Attribute) -> bool {
        self.originals.contains_key(attribute.name())
    }

    /// Modified attributes in declaration order
    pub fn modified_attributes(&self) -> Vec<&Attribute> {
        self.definition
            .attributes()
            .iter()
            .filter(|a| self.originals.contains_key(a.name()))
            .map(|a| a.attribute())
            .collect()
    }

    /// Restore the original value of `attribute`
    pub fn revert(&mut self, attribute: &Attribute) {
        if let Some(original) = self.originals.get(attribute.name()).cloned() {
            self.set_value(attribute.name(), original);
            self.drop_stale_references(attribute.name());
        }
    }

    pub fn revert_all(&mut self) {
        let names: Vec<String> = self.originals.keys().cloned().collect();
        for name in names {
            if let Some(original) = self.originals.get(&name).cloned() {
                self.set_value(&name, original);
                self.drop_stale_references(&name);
            }
        }
    }

    /// Accept the current value of `attribute` as its original
    pub fn save(&mut self, attribute: &Attribute) {
        self.originals.remove(attribute.name());
    }

    /// Accept all current values as originals
    pub fn save_all(&mut self) {
        self.originals.clear();
    }

    /// Primary key built from current values.
    ///
    /// Fails when the type has no primary key or a key attribute is unset.
    pub fn key(&self) -> Result<Key> {
        self.build_key(|name| self.values.get(name))
    }

    /// Primary key built from original values, used to target rows whose key was edited
    pub fn original_key(&self) -> Result<Key> {
        self.build_key(|name| self.originals.get(name).or_else(|| self.values.get(name)))
    }

    /// Key of the entity referenced by `foreign_key`, from the reference columns.
    ///
    /// `None` when any reference column is null or unset.
    pub fn referenced_key(&self, foreign_key: &Attribute) -> Option<Key> {
        let definition = self.definition.attribute_definition(foreign_key.name())?;
        let AttributeKind::ForeignKey {
            referenced_type,
            references,
            ..
        } = definition.kind()
        else {
            return None;
        };

        let mut values = Vec::with_capacity(references.len());
        for (local, target) in references {
            let value = self.values.get(local).filter(|v| !v.is_null())?;
            let value_type = self.definition.attribute_definition(local)?.value_type();
            values.push((
                Attribute::new(referenced_type, target.clone(), value_type),
                value.clone(),
            ));
        }

        Some(Key::from_parts(referenced_type.clone(), values))
    }

    /// Validate every attribute, including that required attributes are set.
    ///
    /// Generated primary keys are exempt from the required check.
    pub fn validate(&self) -> Result<()> {
        let generated_key = self.definition.key_generator().is_generated();
        for attribute_definition in self.definition.attributes() {
            if attribute_definition.is_derived() || attribute_definition.is_foreign_key() {
                continue;
            }
            let value = self.get(attribute_definition.attribute());
            if value.is_null() && generated_key && attribute_definition.is_primary_key() {
                continue;
            }
            check_value(attribute_definition, &value)?;
        }
        Ok(())
    }

    /// Validate the modified attributes only; untouched values stay as loaded
    pub fn validate_modified(&self) -> Result<()> {
        for attribute in self.modified_attributes() {
            let attribute_definition = self.definition.definition_of(attribute)?;
            if attribute_definition.is_derived() || attribute_definition.is_foreign_key() {
                continue;
            }
            check_value(attribute_definition, &self.get(attribute))?;
        }
        Ok(())
    }

    /// A copy of this entity, including its modification state
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Set values, in attribute name order
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Original values of modified attributes
    pub fn originals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.originals.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn build_key<'a>(&'a self, lookup: impl Fn(&str) -> Option<&'a Value>) -> Result<Key> {
        if !self.definition.has_primary_key() {
            return Err(Error::Configuration(format!(
                "{} has no primary key",
                self.entity_type()
            )));
        }

        let mut values = Vec::new();
        for column in self.definition.primary_key() {
            match lookup(column.name()) {
                Some(value) if !value.is_null() => {
                    values.push((column.attribute().clone(), value.clone()))
                }
                _ => {
                    return Err(ValidationError::new(
                        ValidationKind::NullNotAllowed,
                        column.attribute(),
                        Value::Null,
                        "primary key value is not set",
                    )
                    .into())
                }
            }
        }

        Ok(Key::from_parts(self.entity_type().clone(), values))
    }

    /// Store a value, maintaining the original snapshot. Unset counts as null.
    fn set_value(&mut self, name: &str, value: Value) -> Value {
        let previous = self
            .values
            .insert(name.to_string(), value.clone())
            .unwrap_or_default();

        match self.originals.get(name) {
            Some(original) => {
                if *original == value {
                    self.originals.remove(name);
                }
            }
            None => {
                if previous != value {
                    self.originals.insert(name.to_string(), previous.clone());
                }
            }
        }

        previous
    }

    /// Remove materialized references that no longer match their reference columns
    fn drop_stale_references(&mut self, column: &str) {
        let stale: Vec<String> = self
            .definition
            .foreign_keys_using(column)
            .filter(|fk| !self.reference_matches(fk))
            .map(|fk| fk.name().to_string())
            .collect();
        for name in stale {
            self.values.remove(&name);
        }
    }

    fn reference_matches(&self, foreign_key: &AttributeDefinition) -> bool {
        let Some(Value::Entity(referenced)) = self.values.get(foreign_key.name()) else {
            return true;
        };
        match foreign_key.kind() {
            AttributeKind::ForeignKey { references, .. } => {
                references.iter().all(|(local, target)| {
                    self.values.get(local).unwrap_or(&Value::Null) == &referenced.get_by_name(target)
                })
            }
            _ => true,
        }
    }
}

/// Integers assigned to real attributes are stored as reals
pub(crate) fn coerce(value: Value, value_type: ValueType) -> Value {
    match (value, value_type) {
        (Value::Integer(i), ValueType::Real) => Value::Real(i as f64),
        (value, _) => value,
    }
}

/// Check a value against the declared type and constraints of an attribute
pub(crate) fn check_value(
    definition: &AttributeDefinition,
    value: &Value,
) -> std::result::Result<(), ValidationError> {
    let reject = |kind: ValidationKind, message: String| {
        Err(ValidationError::new(
            kind,
            definition.attribute(),
            value.clone(),
            message,
        ))
    };

    if definition.is_derived() {
        return reject(
            ValidationKind::ReadOnly,
            "derived attributes can not be set".to_string(),
        );
    }
    if !value.fits(definition.value_type()) {
        return reject(
            ValidationKind::TypeMismatch,
            format!("expected a value of type {}", definition.value_type()),
        );
    }
    if let (AttributeKind::ForeignKey { referenced_type, .. }, Value::Entity(entity)) =
        (definition.kind(), value)
    {
        if entity.entity_type() != referenced_type {
            return reject(
                ValidationKind::TypeMismatch,
                format!("expected an entity of type {}", referenced_type),
            );
        }
    }
    if value.is_null() {
        if !definition.is_nullable() {
            return reject(
                ValidationKind::NullNotAllowed,
                "a value is required".to_string(),
            );
        }
        return Ok(());
    }
    if let Value::Real(real) = value {
        if !real.is_finite() {
            return reject(
                ValidationKind::OutOfRange,
                format!("{} is not a finite number", real),
            );
        }
    }
    if let (Some(max), Some(length)) = (definition.max_length_value(), value.length()) {
        if length > max {
            return reject(
                ValidationKind::LengthExceeded,
                format!("length {} exceeds maximum of {}", length, max),
            );
        }
    }
    if let Some(number) = value.as_f64() {
        if let Some(min) = definition.minimum_value() {
            if number < min {
                return reject(
                    ValidationKind::OutOfRange,
                    format!("{} is below minimum of {}", number, min),
                );
            }
        }
        if let Some(max) = definition.maximum_value() {
            if number > max {
                return reject(
                    ValidationKind::OutOfRange,
                    format!("{} is above maximum of {}", number, max),
                );
            }
        }
    }
    Ok(())
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type() == other.entity_type() && self.values == other.values
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_type().hash(state);
        self.values.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", self.entity_type())
            .field("values", &self.values)
            .field("originals", &self.originals)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.entity_type().name())?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        f.write_str("}")
    }
}
