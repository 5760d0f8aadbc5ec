//! Error taxonomy shared by every transport
//!
//! The same `Error` is produced whether an operation ran in-process or on the
//! far side of a remote session or HTTP request; see [`crate::codec::WireError`]
//! for how errors cross process boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Operator;
use crate::domain::Attribute;
use crate::entity::Entity;
use crate::value::{Value, ValueType};

/// Result alias used throughout dalmux
pub type Result<T> = std::result::Result<T, Error>;

/// Why a value was rejected by an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    NullNotAllowed,
    LengthExceeded,
    OutOfRange,
    TypeMismatch,
    UnknownAttribute,
    ReadOnly,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ValidationKind::NullNotAllowed => "null not allowed",
            ValidationKind::LengthExceeded => "length exceeded",
            ValidationKind::OutOfRange => "out of range",
            ValidationKind::TypeMismatch => "type mismatch",
            ValidationKind::UnknownAttribute => "unknown attribute",
            ValidationKind::ReadOnly => "read only",
        };
        f.write_str(text)
    }
}

/// A value rejected by an attribute's declared type or constraints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} for '{attribute}': {message} (value: {value})")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub attribute: Attribute,
    pub value: Value,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        kind: ValidationKind,
        attribute: &Attribute,
        value: Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            attribute: attribute.clone(),
            value,
            message: message.into(),
        }
    }
}

/// An invalid condition, raised while the condition is being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConditionError {
    #[error("operator {operator} expects {expected} value(s), got {actual}")]
    ValueCount {
        operator: Operator,
        expected: String,
        actual: usize,
    },
    #[error("operator {operator} does not accept null values")]
    NullValue { operator: Operator },
    #[error("value of type {actual} does not fit attribute '{attribute}' of type {expected}")]
    TypeMismatch {
        attribute: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("attribute '{attribute}' of type {value_type} can not be used in a condition")]
    UnsupportedAttribute {
        attribute: String,
        value_type: ValueType,
    },
    #[error("conditions for different entity types can not be combined: {first} and {second}")]
    MixedEntityTypes { first: String, second: String },
    #[error("at least one {what} is required")]
    Empty { what: String },
}

/// The error type of every dalmux operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid condition: {0}")]
    Condition(#[from] ConditionError),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Optimistic-concurrency failure. `current` is `None` when the row has been deleted.
    #[error("record has been modified by another user: {entity}")]
    RowModified {
        entity: Box<Entity>,
        current: Option<Box<Entity>>,
    },

    #[error("record not found")]
    NotFound,

    #[error("expected a single record, query returned {0}")]
    MultipleResults(usize),

    #[error("entity is not modified, nothing to update: {0}")]
    NothingToUpdate(String),

    #[error("expected {expected} affected row(s), got {actual}")]
    RowCountMismatch { expected: u64, actual: u64 },

    #[error("no connection available after waiting {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("connection is closed")]
    Closed,
}

impl Error {
    /// True for failures reaching the server, as opposed to the server rejecting the data
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Closed)
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
