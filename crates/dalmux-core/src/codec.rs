//! Versioned value-tree encoding
//!
//! Entities, keys, conditions and errors leave the process only as the plain
//! serde trees defined here. Trees carry no references to definitions; the
//! receiving side rebuilds (and re-validates) domain objects against its own
//! [`Domain`]. Remote and HTTP transports share this encoding.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, Conjunction, Operator, OrderBy, Select};
use crate::domain::{Attribute, AttributeKind, Domain, EntityType};
use crate::entity::{check_value, coerce, Entity, Key};
use crate::error::{ConditionError, Error, Result, ValidationError, ValidationKind};
use crate::value::Value;

/// Current encoding version; envelopes with another version are rejected
pub const CODEC_VERSION: u32 = 1;

/// A versioned payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            version: CODEC_VERSION,
            payload,
        }
    }

    /// Unwrap the payload, failing on a version mismatch
    pub fn open(self) -> Result<T> {
        if self.version != CODEC_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported codec version {} (expected {})",
                self.version, CODEC_VERSION
            )));
        }
        Ok(self.payload)
    }
}

/// Encode a payload as an enveloped JSON document
pub fn to_bytes<T: Serialize>(payload: T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope::new(payload))?)
}

/// Decode an enveloped JSON document
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice::<Envelope<T>>(bytes)?.open()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ValueTree {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Base64 encoded
    Bytes(String),
    Entity(Box<EntityTree>),
}

impl From<&Value> for ValueTree {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ValueTree::Null,
            Value::Boolean(b) => ValueTree::Boolean(*b),
            Value::Integer(i) => ValueTree::Integer(*i),
            Value::Real(r) => ValueTree::Real(*r),
            Value::Text(s) => ValueTree::Text(s.clone()),
            Value::Date(d) => ValueTree::Date(*d),
            Value::Timestamp(t) => ValueTree::Timestamp(*t),
            Value::Bytes(b) => ValueTree::Bytes(STANDARD.encode(b)),
            Value::Entity(e) => ValueTree::Entity(Box::new(EntityTree::from(e.as_ref()))),
        }
    }
}

impl ValueTree {
    /// Rebuild the value; referenced entities are taken as database rows
    pub fn into_value(self, domain: &Domain) -> Result<Value> {
        Ok(match self {
            ValueTree::Null => Value::Null,
            ValueTree::Boolean(b) => Value::Boolean(b),
            ValueTree::Integer(i) => Value::Integer(i),
            ValueTree::Real(r) => Value::Real(r),
            ValueTree::Text(s) => Value::Text(s),
            ValueTree::Date(d) => Value::Date(d),
            ValueTree::Timestamp(t) => Value::Timestamp(t),
            ValueTree::Bytes(b) => Value::Bytes(
                STANDARD
                    .decode(b)
                    .map_err(|e| Error::Serialization(format!("invalid bytes value: {}", e)))?,
            ),
            ValueTree::Entity(e) => Value::Entity(Box::new(e.into_loaded_entity(domain)?)),
        })
    }
}

/// Encode a list of values
pub fn value_trees(values: &[Value]) -> Vec<ValueTree> {
    values.iter().map(ValueTree::from).collect()
}

/// Rebuild a list of values
pub fn values_from_trees(trees: Vec<ValueTree>, domain: &Domain) -> Result<Vec<Value>> {
    trees.into_iter().map(|t| t.into_value(domain)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTree {
    pub entity_type: EntityType,
    pub values: BTreeMap<String, ValueTree>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub originals: BTreeMap<String, ValueTree>,
}

impl From<&Entity> for EntityTree {
    fn from(entity: &Entity) -> Self {
        Self {
            entity_type: entity.entity_type().clone(),
            values: entity
                .values()
                .map(|(name, value)| (name.to_string(), ValueTree::from(value)))
                .collect(),
            originals: entity
                .originals()
                .map(|(name, value)| (name.to_string(), ValueTree::from(value)))
                .collect(),
        }
    }
}

/// How strictly decoded entity values are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    /// Entities handed in by a caller: values being written must satisfy
    /// every attribute constraint, as if assigned with `put`
    Checked,
    /// Rows read from the database: types only, so rows that predate a
    /// constraint can still be read
    Loaded,
}

impl EntityTree {
    /// Rebuild the entity, validating the values it would write.
    ///
    /// A new entity has every value checked, a loaded one its modified
    /// values. Originals and untouched values are only type checked.
    pub fn into_entity(self, domain: &Domain) -> Result<Entity> {
        self.decode(domain, Decoding::Checked)
    }

    /// Rebuild an entity read from the database, checking value types only
    pub fn into_loaded_entity(self, domain: &Domain) -> Result<Entity> {
        self.decode(domain, Decoding::Loaded)
    }

    fn decode(self, domain: &Domain, decoding: Decoding) -> Result<Entity> {
        let definition = domain.definition(&self.entity_type)?;

        let rebuild = |trees: BTreeMap<String, ValueTree>,
                       checked: &dyn Fn(&str) -> bool|
         -> Result<BTreeMap<String, Value>> {
            let mut values = BTreeMap::new();
            for (name, tree) in trees {
                let attribute = definition.attribute_definition(&name).ok_or_else(|| {
                    Error::Serialization(format!(
                        "unknown attribute '{}' for {}",
                        name, self.entity_type
                    ))
                })?;
                if attribute.is_derived() {
                    continue;
                }
                let value = coerce(tree.into_value(domain)?, attribute.value_type());
                if checked(&name) {
                    check_value(attribute, &value)?;
                } else {
                    let type_ok = match (attribute.kind(), &value) {
                        (AttributeKind::ForeignKey { referenced_type, .. }, Value::Entity(e)) => {
                            e.entity_type() == referenced_type
                        }
                        _ => value.fits(attribute.value_type()),
                    };
                    if !type_ok {
                        return Err(ValidationError::new(
                            ValidationKind::TypeMismatch,
                            attribute.attribute(),
                            value,
                            "value does not match the attribute type",
                        )
                        .into());
                    }
                }
                values.insert(name, value);
            }
            Ok(values)
        };

        let originals = rebuild(self.originals, &|_| false)?;
        let values = rebuild(self.values, &|name| match decoding {
            Decoding::Checked => originals.is_empty() || originals.contains_key(name),
            Decoding::Loaded => false,
        })?;

        Ok(Entity::from_parts(definition, values, originals))
    }
}

/// Encode a list of entities
pub fn entity_trees(entities: &[Entity]) -> Vec<EntityTree> {
    entities.iter().map(EntityTree::from).collect()
}

/// Rebuild a list of entities
pub fn entities_from_trees(trees: Vec<EntityTree>, domain: &Domain) -> Result<Vec<Entity>> {
    trees.into_iter().map(|t| t.into_entity(domain)).collect()
}

/// Rebuild a list of entities read from the database
pub fn loaded_entities_from_trees(trees: Vec<EntityTree>, domain: &Domain) -> Result<Vec<Entity>> {
    trees.into_iter().map(|t| t.into_loaded_entity(domain)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTree {
    pub entity_type: EntityType,
    pub values: BTreeMap<String, ValueTree>,
}

impl From<&Key> for KeyTree {
    fn from(key: &Key) -> Self {
        Self {
            entity_type: key.entity_type().clone(),
            values: key
                .values()
                .iter()
                .map(|(attribute, value)| (attribute.name().to_string(), ValueTree::from(value)))
                .collect(),
        }
    }
}

impl KeyTree {
    pub fn into_key(self, domain: &Domain) -> Result<Key> {
        let definition = domain.definition(&self.entity_type)?;
        let mut values = Vec::with_capacity(self.values.len());
        for (name, tree) in self.values {
            let attribute = definition.attribute(&name).cloned().ok_or_else(|| {
                Error::Serialization(format!(
                    "unknown key attribute '{}' for {}",
                    name, self.entity_type
                ))
            })?;
            values.push((attribute, tree.into_value(domain)?));
        }
        Key::composite(&definition, values)
    }
}

pub fn key_trees(keys: &[Key]) -> Vec<KeyTree> {
    keys.iter().map(KeyTree::from).collect()
}

pub fn keys_from_trees(trees: Vec<KeyTree>, domain: &Domain) -> Result<Vec<Key>> {
    trees.into_iter().map(|t| t.into_key(domain)).collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionTree {
    All {
        entity_type: EntityType,
    },
    Attribute {
        attribute: Attribute,
        operator: Operator,
        values: Vec<ValueTree>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    Combination {
        conjunction: Conjunction,
        conditions: Vec<ConditionTree>,
    },
}

impl From<&Condition> for ConditionTree {
    fn from(condition: &Condition) -> Self {
        match condition {
            Condition::All(entity_type) => ConditionTree::All {
                entity_type: entity_type.clone(),
            },
            Condition::Attribute(c) => ConditionTree::Attribute {
                attribute: c.attribute().clone(),
                operator: c.operator(),
                values: value_trees(c.values()),
                case_sensitive: c.is_case_sensitive(),
            },
            Condition::Combination(c) => ConditionTree::Combination {
                conjunction: c.conjunction(),
                conditions: c.conditions().iter().map(ConditionTree::from).collect(),
            },
        }
    }
}

impl ConditionTree {
    /// Rebuild the condition, running the same validation as local construction
    pub fn into_condition(self, domain: &Domain) -> Result<Condition> {
        match self {
            ConditionTree::All { entity_type } => {
                domain.definition(&entity_type)?;
                Ok(Condition::all(&entity_type))
            }
            ConditionTree::Attribute {
                attribute,
                operator,
                values,
                case_sensitive,
            } => {
                resolve_attribute(domain, &attribute)?;
                let values = values_from_trees(values, domain)?;
                Ok(Condition::new(&attribute, operator, values, case_sensitive)?)
            }
            ConditionTree::Combination {
                conjunction,
                conditions,
            } => {
                let conditions = conditions
                    .into_iter()
                    .map(|c| c.into_condition(domain))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Condition::combine(conjunction, conditions)?)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectTree {
    pub condition: ConditionTree,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub for_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_depth: Option<usize>,
}

impl From<&Select> for SelectTree {
    fn from(select: &Select) -> Self {
        Self {
            condition: ConditionTree::from(select.condition()),
            order_by: select.order_by_list().to_vec(),
            limit: select.limit_value(),
            offset: select.offset_value(),
            attributes: select.selected_attributes().to_vec(),
            for_update: select.is_for_update(),
            fetch_depth: select.fetch_depth_value(),
        }
    }
}

impl SelectTree {
    pub fn into_select(self, domain: &Domain) -> Result<Select> {
        let condition = self.condition.into_condition(domain)?;
        for attribute in self.attributes.iter().chain(self.order_by.iter().map(|o| &o.attribute)) {
            resolve_attribute(domain, attribute)?;
        }

        let mut select = Select::new(condition).attributes(self.attributes);
        for order_by in self.order_by {
            select = select.order_by(order_by);
        }
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select = select.offset(offset);
        }
        if self.for_update {
            select = select.for_update();
        }
        if let Some(depth) = self.fetch_depth {
            select = select.fetch_depth(depth);
        }
        Ok(select)
    }
}

/// Check that an attribute received over the wire exists with the declared type
pub fn resolve_attribute(domain: &Domain, attribute: &Attribute) -> Result<()> {
    domain
        .definition(attribute.entity_type())?
        .definition_of(attribute)?;
    Ok(())
}

/// An [`Error`] in transit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum WireError {
    Validation {
        kind: ValidationKind,
        attribute: Attribute,
        value: ValueTree,
        message: String,
    },
    Condition {
        cause: ConditionError,
    },
    Configuration {
        message: String,
    },
    RowModified {
        entity: EntityTree,
        current: Option<EntityTree>,
    },
    NotFound,
    MultipleResults {
        count: usize,
    },
    NothingToUpdate {
        message: String,
    },
    RowCountMismatch {
        expected: u64,
        actual: u64,
    },
    PoolExhausted {
        waited_ms: u64,
    },
    Authentication {
        message: String,
    },
    Transport {
        message: String,
    },
    Database {
        message: String,
    },
    Transaction {
        message: String,
    },
    Serialization {
        message: String,
    },
    UnknownOperation {
        id: String,
    },
    Unsupported {
        message: String,
    },
    Closed,
}

impl From<&Error> for WireError {
    fn from(error: &Error) -> Self {
        match error {
            Error::Validation(e) => WireError::Validation {
                kind: e.kind,
                attribute: e.attribute.clone(),
                value: ValueTree::from(&e.value),
                message: e.message.clone(),
            },
            Error::Condition(e) => WireError::Condition { cause: e.clone() },
            Error::Configuration(m) => WireError::Configuration { message: m.clone() },
            Error::RowModified { entity, current } => WireError::RowModified {
                entity: EntityTree::from(entity.as_ref()),
                current: current.as_deref().map(EntityTree::from),
            },
            Error::NotFound => WireError::NotFound,
            Error::MultipleResults(count) => WireError::MultipleResults { count: *count },
            Error::NothingToUpdate(m) => WireError::NothingToUpdate { message: m.clone() },
            Error::RowCountMismatch { expected, actual } => WireError::RowCountMismatch {
                expected: *expected,
                actual: *actual,
            },
            Error::PoolExhausted { waited_ms } => WireError::PoolExhausted {
                waited_ms: *waited_ms,
            },
            Error::Authentication(m) => WireError::Authentication { message: m.clone() },
            Error::Transport(m) => WireError::Transport { message: m.clone() },
            Error::Database(m) => WireError::Database { message: m.clone() },
            Error::Transaction(m) => WireError::Transaction { message: m.clone() },
            Error::Serialization(m) => WireError::Serialization { message: m.clone() },
            Error::UnknownOperation(id) => WireError::UnknownOperation { id: id.clone() },
            Error::Unsupported(m) => WireError::Unsupported { message: m.clone() },
            Error::Closed => WireError::Closed,
        }
    }
}

impl WireError {
    /// Rebuild the error; entities are rebuilt against `domain`
    pub fn into_error(self, domain: &Domain) -> Error {
        match self {
            WireError::Validation {
                kind,
                attribute,
                value,
                message,
            } => match value.into_value(domain) {
                Ok(value) => Error::Validation(ValidationError {
                    kind,
                    attribute,
                    value,
                    message,
                }),
                Err(e) => e,
            },
            WireError::Condition { cause } => Error::Condition(cause),
            WireError::Configuration { message } => Error::Configuration(message),
            WireError::RowModified { entity, current } => {
                let entity = match entity.into_loaded_entity(domain) {
                    Ok(entity) => entity,
                    Err(e) => return e,
                };
                let current = match current.map(|c| c.into_loaded_entity(domain)).transpose() {
                    Ok(current) => current,
                    Err(e) => return e,
                };
                Error::RowModified {
                    entity: Box::new(entity),
                    current: current.map(Box::new),
                }
            }
            WireError::NotFound => Error::NotFound,
            WireError::MultipleResults { count } => Error::MultipleResults(count),
            WireError::NothingToUpdate { message } => Error::NothingToUpdate(message),
            WireError::RowCountMismatch { expected, actual } => {
                Error::RowCountMismatch { expected, actual }
            }
            WireError::PoolExhausted { waited_ms } => Error::PoolExhausted { waited_ms },
            WireError::Authentication { message } => Error::Authentication(message),
            WireError::Transport { message } => Error::Transport(message),
            WireError::Database { message } => Error::Database(message),
            WireError::Transaction { message } => Error::Transaction(message),
            WireError::Serialization { message } => Error::Serialization(message),
            WireError::UnknownOperation { id } => Error::UnknownOperation(id),
            WireError::Unsupported { message } => Error::Unsupported(message),
            WireError::Closed => Error::Closed,
        }
    }
}
