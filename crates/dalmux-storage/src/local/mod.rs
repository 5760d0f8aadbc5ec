//! Direct database access
//!
//! A [`LocalEntityConnection`] owns one pooled physical connection for its
//! whole lifetime, since transaction state lives on the physical connection.
//! Operations run synchronously on that connection; the async surface only
//! exists so that every transport shares one contract.

mod statements;

use std::sync::Arc;

use async_trait::async_trait;
use dalmux_core::{
    Attribute, Condition, Domain, Entity, EntityConnection, Error, Key, Result, Select, User,
    Value,
};
use tracing::{debug, info, warn};

use crate::database::DatabaseConnection;
use crate::operations::DatabaseOperations;
use crate::pool::{ConnectionPool, PooledConnection};
use statements::Executor;

/// Lock an implicit transaction takes up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub struct LocalEntityConnection {
    domain: Arc<Domain>,
    user: User,
    connection: Option<PooledConnection>,
    operations: Arc<DatabaseOperations>,
    optimistic_locking: bool,
}

impl LocalEntityConnection {
    /// Check out a connection from `pool` for the lifetime of this instance
    pub async fn new(domain: Arc<Domain>, pool: &dyn ConnectionPool) -> Result<Self> {
        let connection = pool.connection().await?;
        Ok(Self::with_connection(domain, pool.user().clone(), connection))
    }

    pub fn with_connection(domain: Arc<Domain>, user: User, connection: PooledConnection) -> Self {
        debug!("[Local] Connected {} to domain {}", user, domain.name());
        Self {
            domain,
            user,
            connection: Some(connection),
            operations: Arc::new(DatabaseOperations::default()),
            optimistic_locking: true,
        }
    }

    pub fn with_operations(mut self, operations: Arc<DatabaseOperations>) -> Self {
        self.operations = operations;
        self
    }

    /// Enabled by default
    pub fn with_optimistic_locking(mut self, enabled: bool) -> Self {
        self.optimistic_locking = enabled;
        self
    }

    pub fn is_optimistic_locking(&self) -> bool {
        self.optimistic_locking
    }

    fn database_connection(&self) -> Result<&DatabaseConnection> {
        self.connection
            .as_ref()
            .ok_or(Error::Closed)?
            .database_connection()
    }

    fn run<T>(&self, operation: impl FnOnce(&Executor<'_>) -> Result<T>) -> Result<T> {
        self.run_in(Access::Read, operation)
    }

    fn run_write<T>(&self, operation: impl FnOnce(&Executor<'_>) -> Result<T>) -> Result<T> {
        self.run_in(Access::Write, operation)
    }

    /// Run `operation`, inside an implicit transaction unless one is open.
    ///
    /// An implicit transaction is committed on success and rolled back on
    /// failure. A failure inside an explicit transaction leaves it open.
    fn run_in<T>(
        &self,
        access: Access,
        operation: impl FnOnce(&Executor<'_>) -> Result<T>,
    ) -> Result<T> {
        let database = self.database_connection()?;
        let executor = Executor {
            connection: database.connection()?,
            dialect: database.dialect().as_ref(),
            domain: &self.domain,
            operations: &self.operations,
            optimistic_locking: self.optimistic_locking,
        };

        if database.is_transaction_open() {
            return operation(&executor);
        }

        match access {
            Access::Read => database.begin_transaction()?,
            Access::Write => database.begin_write_transaction()?,
        }
        match operation(&executor) {
            Ok(result) => {
                database.commit_transaction()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = database.rollback_transaction() {
                    warn!("[Local] Rollback after failure failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EntityConnection for LocalEntityConnection {
    fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    fn user(&self) -> &User {
        &self.user
    }

    async fn is_connected(&mut self) -> bool {
        self.database_connection()
            .map(DatabaseConnection::is_valid)
            .unwrap_or(false)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        if let Ok(database) = connection.database_connection() {
            if database.is_transaction_open() {
                warn!("[Local] Closing {} with an open transaction, rolling back", self.user);
                database.rollback_transaction()?;
            }
        }
        drop(connection);
        info!("[Local] Disconnected {}", self.user);
        Ok(())
    }

    async fn is_transaction_open(&mut self) -> Result<bool> {
        Ok(self.database_connection()?.is_transaction_open())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        let database = self.database_connection()?;
        if database.is_transaction_open() {
            return Err(Error::Transaction("a transaction is already open".to_string()));
        }
        database.begin_transaction()?;
        debug!("[Local] Transaction started for {}", self.user);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let database = self.database_connection()?;
        if !database.is_transaction_open() {
            return Err(Error::Transaction("no open transaction to commit".to_string()));
        }
        database.commit_transaction()?;
        debug!("[Local] Transaction committed for {}", self.user);
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        let database = self.database_connection()?;
        if !database.is_transaction_open() {
            return Err(Error::Transaction("no open transaction to roll back".to_string()));
        }
        database.rollback_transaction()?;
        debug!("[Local] Transaction rolled back for {}", self.user);
        Ok(())
    }

    async fn execute_function(&mut self, function_id: &str, arguments: &[Value]) -> Result<Value> {
        self.run(|executor| executor.execute_function(function_id, arguments))
    }

    async fn execute_procedure(&mut self, procedure_id: &str, arguments: &[Value]) -> Result<()> {
        self.run_write(|executor| executor.execute_procedure(procedure_id, arguments))
    }

    async fn fill_report(&mut self, report_id: &str, parameters: &[Value]) -> Result<Value> {
        self.run(|executor| executor.fill_report(report_id, parameters))
    }

    async fn insert_all(&mut self, entities: &[Entity]) -> Result<Vec<Key>> {
        self.run_write(|executor| entities.iter().map(|e| executor.insert(e)).collect())
    }

    async fn update_all(&mut self, entities: &[Entity]) -> Result<Vec<Entity>> {
        self.run_write(|executor| entities.iter().map(|e| executor.update(e)).collect())
    }

    async fn delete_all(&mut self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.run_write(|executor| executor.delete(keys))
    }

    async fn delete_where(&mut self, condition: &Condition) -> Result<u64> {
        self.run_write(|executor| executor.delete_where(condition))
    }

    async fn query(&mut self, select: &Select) -> Result<Vec<Entity>> {
        self.run(|executor| executor.select(select))
    }

    async fn count(&mut self, condition: &Condition) -> Result<u64> {
        self.run(|executor| executor.count(condition))
    }

    async fn select_values(
        &mut self,
        attribute: &Attribute,
        condition: &Condition,
    ) -> Result<Vec<Value>> {
        self.run(|executor| executor.select_values(attribute, condition))
    }
}

impl Drop for LocalEntityConnection {
    fn drop(&mut self) {
        if let Some(connection) = &self.connection {
            if let Ok(database) = connection.database_connection() {
                if database.is_transaction_open() {
                    warn!(
                        "[Local] Connection for {} dropped with an open transaction",
                        self.user
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::dialect::SqliteDialect;
    use crate::pool::{DefaultConnectionPool, PoolConfig};
    use dalmux_core::{AttributeDefinition, KeyGenerator, ValueType};

    struct Fixture {
        domain: Arc<Domain>,
        pool: DefaultConnectionPool,
        dir: tempfile::TempDir,
    }

    fn fixture(name: &str) -> Fixture {
        let mut domain = Domain::new(name);
        let dept = domain.entity_type("department");
        domain
            .define(&dept)
            .table("dept")
            .key_generator(KeyGenerator::Identity)
            .attribute(AttributeDefinition::primary_key(dept.attribute("id", ValueType::Integer)))
            .attribute(
                AttributeDefinition::column(dept.attribute("name", ValueType::Text))
                    .nullable(false)
                    .max_length(20),
            )
            .build()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let database =
            SqliteDatabase::file(dir.path().join("local.db"), Arc::new(SqliteDialect)).unwrap();
        database
            .execute_batch("CREATE TABLE dept (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);")
            .unwrap();

        Fixture {
            domain: Arc::new(domain),
            pool: DefaultConnectionPool::new(
                Arc::new(database),
                User::new("scott", "tiger"),
                PoolConfig::default(),
            ),
            dir,
        }
    }

    fn department(domain: &Domain, name: &str) -> Entity {
        let dept = domain.entity_type("department");
        let mut entity = domain.entity(&dept).unwrap();
        entity.put(&dept.attribute("name", ValueType::Text), name).unwrap();
        entity
    }

    #[tokio::test]
    async fn test_identity_key_fetched_after_insert() {
        let f = fixture("local_identity");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();

        let first = connection.insert(&department(&f.domain, "Sales")).await.unwrap();
        let second = connection.insert(&department(&f.domain, "Ops")).await.unwrap();
        assert_eq!(first.value(), Some(&Value::Integer(1)));
        assert_eq!(second.value(), Some(&Value::Integer(2)));

        let stored = connection.select_by_key(&second).await.unwrap();
        assert_eq!(stored.get_by_name("name"), Value::from("Ops"));
    }

    #[tokio::test]
    async fn test_failed_implicit_transaction_is_rolled_back() {
        let f = fixture("local_implicit_rollback");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();

        let dept = f.domain.entity_type("department");
        let mut conflicting = department(&f.domain, "Sales");
        conflicting.put(&dept.attribute("id", ValueType::Integer), 1).unwrap();

        // second insert violates the primary key, the first one must not survive
        let result = connection
            .insert_all(&[conflicting.clone(), conflicting])
            .await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert!(!connection.is_transaction_open().await.unwrap());
        assert_eq!(connection.count(&Condition::all(&dept)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_explicit_transaction_survives_failure() {
        let f = fixture("local_explicit");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();
        let dept = f.domain.entity_type("department");

        connection.begin_transaction().await.unwrap();
        connection.insert(&department(&f.domain, "Sales")).await.unwrap();

        let missing = Key::of(&f.domain.definition(&dept).unwrap(), 42).unwrap();
        assert!(connection.delete(&missing).await.is_err());
        assert!(connection.is_transaction_open().await.unwrap());

        connection.rollback_transaction().await.unwrap();
        assert_eq!(connection.count(&Condition::all(&dept)).await.unwrap(), 0);
        assert!(matches!(
            connection.commit_transaction().await,
            Err(Error::Transaction(_))
        ));
    }

    #[tokio::test]
    async fn test_update_unmodified_entity() {
        let f = fixture("local_nothing_to_update");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();
        let dept = f.domain.entity_type("department");
        let name = dept.attribute("name", ValueType::Text);

        let key = connection.insert(&department(&f.domain, "Sales")).await.unwrap();
        let mut entity = connection.select_by_key(&key).await.unwrap();
        entity.put(&name, "Marketing").unwrap();

        let updated = connection.update(&entity).await.unwrap();
        assert_eq!(updated.get(&name), Value::from("Marketing"));
        assert!(!updated.is_modified());

        assert!(matches!(
            connection.update(&updated).await,
            Err(Error::NothingToUpdate(_))
        ));
    }

    #[tokio::test]
    async fn test_update_waits_for_concurrent_writer() {
        let f = fixture("local_concurrent_writer");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();
        let name = f.domain.entity_type("department").attribute("name", ValueType::Text);

        let key = connection.insert(&department(&f.domain, "Sales")).await.unwrap();
        let mut stale = connection.select_by_key(&key).await.unwrap();
        stale.put(&name, "Support").unwrap();

        // another process holds the write lock and commits shortly
        let writer = rusqlite::Connection::open(f.dir.path().join("local.db")).unwrap();
        writer
            .execute_batch("BEGIN IMMEDIATE; UPDATE dept SET name = 'Marketing';")
            .unwrap();
        let committer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            writer.execute_batch("COMMIT").unwrap();
        });

        match connection.update(&stale).await {
            Err(Error::RowModified { current, .. }) => {
                assert_eq!(current.unwrap().get(&name), Value::from("Marketing"));
            }
            other => panic!("expected RowModified, got {:?}", other),
        }
        committer.join().unwrap();
        assert!(!connection.is_transaction_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection_returns_to_pool() {
        let f = fixture("local_close");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();
        assert!(connection.is_connected().await);
        assert_eq!(f.pool.statistics().in_use, 1);

        connection.close().await.unwrap();
        assert!(!connection.is_connected().await);
        assert_eq!(f.pool.statistics().in_use, 0);
        assert!(matches!(
            connection.count(&Condition::all(&f.domain.entity_type("department"))).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let f = fixture("local_unknown_function");
        let mut connection = LocalEntityConnection::new(Arc::clone(&f.domain), &f.pool).await.unwrap();
        assert!(matches!(
            connection.execute_function("missing", &[]).await,
            Err(Error::UnknownOperation(_))
        ));
    }
}
