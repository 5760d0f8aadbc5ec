//! # Dalmux Core Library
//!
//! Domain model and connection contract shared by every dalmux transport.
//!
//! ## Modules
//!
//! - `domain` - Entity types, attribute definitions and the domain registry
//! - `entity` - Entity instances with change tracking, primary keys
//! - `value` - Attribute values and types
//! - `condition` - Condition algebra and select queries
//! - `connection` - The `EntityConnection` contract
//! - `codec` - Versioned value trees for crossing process boundaries
//! - `protocol` - Request/response messages of the remote and HTTP transports
//! - `client` - Users, connection requests and remote clients
//! - `error` - Error taxonomy

pub mod client;
pub mod codec;
pub mod condition;
pub mod connection;
pub mod domain;
pub mod entity;
pub mod error;
pub mod protocol;
pub mod value;

// Re-export commonly used types
pub use client::{ConnectionRequest, RemoteClient, User, FRAMEWORK_VERSION};
pub use condition::{Condition, Conjunction, Direction, Operator, OrderBy, Select};
pub use connection::EntityConnection;
pub use domain::{
    Attribute, AttributeDefinition, Domain, EntityDefinition, EntityType, KeyGenerator,
};
pub use entity::{Entity, Key};
pub use error::{ConditionError, Error, Result, ValidationError, ValidationKind};
pub use value::{Value, ValueType};
