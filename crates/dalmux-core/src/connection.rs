//! The transport independent connection contract

use std::sync::Arc;

use async_trait::async_trait;

use crate::condition::{Condition, Select};
use crate::client::User;
use crate::domain::{Attribute, Domain};
use crate::entity::{Entity, Key};
use crate::error::{Error, Result};
use crate::value::Value;

/// CRUD and transaction control over one domain.
///
/// Local, remote and HTTP connections implement this identically. An instance
/// owns one transaction context and is not meant to be shared between tasks;
/// open one connection per task instead.
///
/// Any CRUD call made while no transaction is open runs in its own implicit
/// transaction, committed on success and rolled back on failure. Failures
/// inside an explicit transaction leave it open.
#[async_trait]
pub trait EntityConnection: Send {
    fn domain(&self) -> &Arc<Domain>;

    fn user(&self) -> &User;

    /// Live check against the underlying resource (database round trip or server ping)
    async fn is_connected(&mut self) -> bool;

    /// Release the connection; a transaction still open is rolled back
    async fn close(&mut self) -> Result<()>;

    async fn is_transaction_open(&mut self) -> Result<bool>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn rollback_transaction(&mut self) -> Result<()>;

    async fn execute_function(&mut self, function_id: &str, arguments: &[Value]) -> Result<Value>;

    async fn execute_procedure(&mut self, procedure_id: &str, arguments: &[Value]) -> Result<()>;

    /// Fill a named report with the database connection of this session
    async fn fill_report(&mut self, report_id: &str, parameters: &[Value]) -> Result<Value>;

    /// Insert entities, returning their primary keys in order
    async fn insert_all(&mut self, entities: &[Entity]) -> Result<Vec<Key>>;

    /// Update modified attributes, returning the entities as stored
    async fn update_all(&mut self, entities: &[Entity]) -> Result<Vec<Entity>>;

    async fn delete_all(&mut self, keys: &[Key]) -> Result<()>;

    /// Delete all rows matching `condition`, returning the number deleted
    async fn delete_where(&mut self, condition: &Condition) -> Result<u64>;

    async fn query(&mut self, select: &Select) -> Result<Vec<Entity>>;

    async fn count(&mut self, condition: &Condition) -> Result<u64>;

    /// Distinct non-null values of `attribute` among matching rows, ordered
    async fn select_values(
        &mut self,
        attribute: &Attribute,
        condition: &Condition,
    ) -> Result<Vec<Value>>;

    async fn is_valid(&mut self) -> bool {
        self.is_connected().await
    }

    async fn insert(&mut self, entity: &Entity) -> Result<Key> {
        self.insert_all(std::slice::from_ref(entity))
            .await?
            .pop()
            .ok_or_else(|| Error::Database("insert returned no key".to_string()))
    }

    async fn update(&mut self, entity: &Entity) -> Result<Entity> {
        self.update_all(std::slice::from_ref(entity))
            .await?
            .pop()
            .ok_or(Error::NotFound)
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.delete_all(std::slice::from_ref(key)).await
    }

    async fn select(&mut self, condition: &Condition) -> Result<Vec<Entity>> {
        self.query(&Select::new(condition.clone())).await
    }

    /// Exactly one matching entity, failing with not-found or multiple-results
    async fn select_single(&mut self, condition: &Condition) -> Result<Entity> {
        let mut entities = self.select(condition).await?;
        match entities.len() {
            0 => Err(Error::NotFound),
            1 => Ok(entities.remove(0)),
            n => Err(Error::MultipleResults(n)),
        }
    }

    async fn select_by_key(&mut self, key: &Key) -> Result<Entity> {
        self.select_single(&Condition::key(key)?).await
    }

    async fn select_by_keys(&mut self, keys: &[Key]) -> Result<Vec<Entity>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.select(&Condition::keys(keys)?).await
    }
}
