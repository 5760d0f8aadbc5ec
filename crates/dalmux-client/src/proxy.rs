//! The `EntityConnection` shared by the remote and HTTP transports
//!
//! A [`ProxyConnection`] turns every contract call into one
//! [`EntityRequest`] and hands it to a [`Channel`]. Channels only move
//! requests and outcomes; rebuilding entities, keys and errors against the
//! local domain happens here.

use std::sync::Arc;

use async_trait::async_trait;
use dalmux_core::codec::{entity_trees, key_trees, value_trees, ConditionTree, SelectTree};
use dalmux_core::protocol::{EntityRequest, EntityResponse, Outcome};
use dalmux_core::{
    Attribute, Condition, Domain, Entity, EntityConnection, Key, Result, Select, User, Value,
};
use tracing::debug;

/// Moves one request to the server and brings its outcome back.
///
/// `Err` is reserved for failures of the channel itself (transport,
/// authentication, closed); errors raised by the server arrive as
/// [`Outcome::Err`].
#[async_trait]
pub trait Channel: Send {
    async fn call(&mut self, request: EntityRequest) -> Result<Outcome>;

    /// Whether the channel can still carry requests
    fn is_open(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// An `EntityConnection` forwarding every call over a [`Channel`].
pub struct ProxyConnection<C> {
    domain: Arc<Domain>,
    user: User,
    channel: C,
}

impl<C: Channel> ProxyConnection<C> {
    pub(crate) fn new(domain: Arc<Domain>, user: User, channel: C) -> Self {
        Self {
            domain,
            user,
            channel,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    async fn invoke(&mut self, request: EntityRequest) -> Result<EntityResponse> {
        debug!("[Proxy] Calling {}", request.method());
        self.channel.call(request).await?.into_result(&self.domain)
    }
}

#[async_trait]
impl<C: Channel> EntityConnection for ProxyConnection<C> {
    fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    fn user(&self) -> &User {
        &self.user
    }

    async fn is_connected(&mut self) -> bool {
        if !self.channel.is_open() {
            return false;
        }
        self.invoke(EntityRequest::Ping).await.is_ok()
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close().await
    }

    async fn is_transaction_open(&mut self) -> Result<bool> {
        self.invoke(EntityRequest::IsTransactionOpen).await?.into_bool()
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.invoke(EntityRequest::BeginTransaction).await?.into_unit()
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.invoke(EntityRequest::CommitTransaction).await?.into_unit()
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.invoke(EntityRequest::RollbackTransaction).await?.into_unit()
    }

    async fn execute_function(&mut self, function_id: &str, arguments: &[Value]) -> Result<Value> {
        let request = EntityRequest::ExecuteFunction {
            function_id: function_id.to_string(),
            arguments: value_trees(arguments),
        };
        let response = self.invoke(request).await?;
        response.into_value(&self.domain)
    }

    async fn execute_procedure(&mut self, procedure_id: &str, arguments: &[Value]) -> Result<()> {
        let request = EntityRequest::ExecuteProcedure {
            procedure_id: procedure_id.to_string(),
            arguments: value_trees(arguments),
        };
        self.invoke(request).await?.into_unit()
    }

    async fn fill_report(&mut self, report_id: &str, parameters: &[Value]) -> Result<Value> {
        let request = EntityRequest::FillReport {
            report_id: report_id.to_string(),
            parameters: value_trees(parameters),
        };
        let response = self.invoke(request).await?;
        response.into_value(&self.domain)
    }

    async fn insert_all(&mut self, entities: &[Entity]) -> Result<Vec<Key>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let request = EntityRequest::Insert {
            entities: entity_trees(entities),
        };
        let response = self.invoke(request).await?;
        response.into_keys(&self.domain)
    }

    async fn update_all(&mut self, entities: &[Entity]) -> Result<Vec<Entity>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let request = EntityRequest::Update {
            entities: entity_trees(entities),
        };
        let response = self.invoke(request).await?;
        response.into_entities(&self.domain)
    }

    async fn delete_all(&mut self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let request = EntityRequest::Delete {
            keys: key_trees(keys),
        };
        self.invoke(request).await?.into_unit()
    }

    async fn delete_where(&mut self, condition: &Condition) -> Result<u64> {
        let request = EntityRequest::DeleteWhere {
            condition: ConditionTree::from(condition),
        };
        self.invoke(request).await?.into_count()
    }

    async fn query(&mut self, select: &Select) -> Result<Vec<Entity>> {
        let request = EntityRequest::Select {
            select: SelectTree::from(select),
        };
        let response = self.invoke(request).await?;
        response.into_entities(&self.domain)
    }

    async fn count(&mut self, condition: &Condition) -> Result<u64> {
        let request = EntityRequest::Count {
            condition: ConditionTree::from(condition),
        };
        self.invoke(request).await?.into_count()
    }

    async fn select_values(
        &mut self,
        attribute: &Attribute,
        condition: &Condition,
    ) -> Result<Vec<Value>> {
        let request = EntityRequest::SelectValues {
            attribute: attribute.clone(),
            condition: ConditionTree::from(condition),
        };
        let response = self.invoke(request).await?;
        response.into_values(&self.domain)
    }
}
