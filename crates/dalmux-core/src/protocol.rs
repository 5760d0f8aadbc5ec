//! Request/response messages carried by the remote and HTTP transports
//!
//! Every `EntityConnection` operation maps onto one [`EntityRequest`]
//! variant. The remote transport wraps them in [`ClientFrame`]s on a
//! persistent socket; the HTTP transport posts one enveloped request per call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ConnectionRequest;
use crate::codec::{
    keys_from_trees, loaded_entities_from_trees, values_from_trees, ConditionTree, EntityTree, KeyTree,
    SelectTree, ValueTree, WireError,
};
use crate::domain::{Attribute, Domain};
use crate::entity::{Entity, Key};
use crate::error::{Error, Result};
use crate::value::Value;

/// HTTP header carrying the client id, sent on every request
pub const CLIENT_ID_HEADER: &str = "x-dalmux-client-id";
pub const CLIENT_TYPE_HEADER: &str = "x-dalmux-client-type";
pub const DOMAIN_HEADER: &str = "x-dalmux-domain";
/// HTTP header carrying the transaction session token, only while a transaction is open
pub const SESSION_HEADER: &str = "x-dalmux-session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EntityRequest {
    Ping,
    Disconnect,
    IsTransactionOpen,
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    Insert {
        entities: Vec<EntityTree>,
    },
    Update {
        entities: Vec<EntityTree>,
    },
    Delete {
        keys: Vec<KeyTree>,
    },
    DeleteWhere {
        condition: ConditionTree,
    },
    Select {
        select: SelectTree,
    },
    Count {
        condition: ConditionTree,
    },
    SelectValues {
        attribute: Attribute,
        condition: ConditionTree,
    },
    ExecuteFunction {
        function_id: String,
        arguments: Vec<ValueTree>,
    },
    ExecuteProcedure {
        procedure_id: String,
        arguments: Vec<ValueTree>,
    },
    FillReport {
        report_id: String,
        parameters: Vec<ValueTree>,
    },
}

impl EntityRequest {
    /// Method name used in logs
    pub fn method(&self) -> &'static str {
        match self {
            EntityRequest::Ping => "ping",
            EntityRequest::Disconnect => "disconnect",
            EntityRequest::IsTransactionOpen => "is_transaction_open",
            EntityRequest::BeginTransaction => "begin_transaction",
            EntityRequest::CommitTransaction => "commit_transaction",
            EntityRequest::RollbackTransaction => "rollback_transaction",
            EntityRequest::Insert { .. } => "insert",
            EntityRequest::Update { .. } => "update",
            EntityRequest::Delete { .. } => "delete",
            EntityRequest::DeleteWhere { .. } => "delete_where",
            EntityRequest::Select { .. } => "select",
            EntityRequest::Count { .. } => "count",
            EntityRequest::SelectValues { .. } => "select_values",
            EntityRequest::ExecuteFunction { .. } => "execute_function",
            EntityRequest::ExecuteProcedure { .. } => "execute_procedure",
            EntityRequest::FillReport { .. } => "fill_report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum EntityResponse {
    Unit,
    Boolean(bool),
    Count(u64),
    Keys(Vec<KeyTree>),
    Entities(Vec<EntityTree>),
    Values(Vec<ValueTree>),
    Value(ValueTree),
}

impl EntityResponse {
    fn unexpected(self, expected: &str) -> Error {
        Error::Serialization(format!("expected a {} response, got {:?}", expected, self))
    }

    pub fn into_unit(self) -> Result<()> {
        match self {
            EntityResponse::Unit => Ok(()),
            other => Err(other.unexpected("unit")),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            EntityResponse::Boolean(b) => Ok(b),
            other => Err(other.unexpected("boolean")),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            EntityResponse::Count(c) => Ok(c),
            other => Err(other.unexpected("count")),
        }
    }

    pub fn into_keys(self, domain: &Domain) -> Result<Vec<Key>> {
        match self {
            EntityResponse::Keys(keys) => keys_from_trees(keys, domain),
            other => Err(other.unexpected("keys")),
        }
    }

    pub fn into_entities(self, domain: &Domain) -> Result<Vec<Entity>> {
        match self {
            EntityResponse::Entities(entities) => loaded_entities_from_trees(entities, domain),
            other => Err(other.unexpected("entities")),
        }
    }

    pub fn into_values(self, domain: &Domain) -> Result<Vec<Value>> {
        match self {
            EntityResponse::Values(values) => values_from_trees(values, domain),
            other => Err(other.unexpected("values")),
        }
    }

    pub fn into_value(self, domain: &Domain) -> Result<Value> {
        match self {
            EntityResponse::Value(value) => value.into_value(domain),
            other => Err(other.unexpected("value")),
        }
    }
}

/// Frames sent by a remote client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on a connection
    Login { request: ConnectionRequest },
    Call { id: u64, request: EntityRequest },
}

/// Frames sent by the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    LoggedIn {
        client_id: Uuid,
        server_version: String,
    },
    LoginFailed {
        error: WireError,
    },
    Reply {
        id: u64,
        outcome: Outcome,
    },
}

/// Result of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(EntityResponse),
    Err(WireError),
}

impl Outcome {
    pub fn from_result(result: Result<EntityResponse>) -> Self {
        match result {
            Ok(response) => Outcome::Ok(response),
            Err(e) => Outcome::Err(WireError::from(&e)),
        }
    }

    pub fn into_result(self, domain: &Domain) -> Result<EntityResponse> {
        match self {
            Outcome::Ok(response) => Ok(response),
            Outcome::Err(e) => Err(e.into_error(domain)),
        }
    }
}
