//! Shared test utilities and fixtures for Dalmux integration tests.

use std::sync::{Arc, OnceLock};

use dalmux_core::domain::registry;
use dalmux_core::{AttributeDefinition, Domain, KeyGenerator, OrderBy, User, ValueType};

/// Transport independent connection scenarios
pub mod scenarios;

/// Running gateway listeners
pub mod servers;
pub use servers::{RunningServer, ServerHarness};

/// Name of the domain every suite registers
pub const DOMAIN: &str = "integration";

pub const SCHEMA: &str = "
CREATE TABLE dept (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT
);
CREATE TABLE emp (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    salary REAL,
    department_id INTEGER REFERENCES dept (id)
);
";

static REGISTERED: OnceLock<Arc<Domain>> = OnceLock::new();

/// The test domain, registered on first use
pub fn domain() -> Arc<Domain> {
    Arc::clone(REGISTERED.get_or_init(|| {
        registry::register(build_domain()).expect("register test domain")
    }))
}

fn build_domain() -> Domain {
    let mut domain = Domain::new(DOMAIN);

    let department = domain.entity_type("department");
    let department_id = department.attribute("id", ValueType::Integer);
    let department_name = department.attribute("name", ValueType::Text);
    domain
        .define(&department)
        .table("dept")
        .order_by(OrderBy::ascending(&department_name))
        .attribute(AttributeDefinition::primary_key(department_id.clone()))
        .attribute(
            AttributeDefinition::column(department_name)
                .nullable(false)
                .max_length(20),
        )
        .attribute(AttributeDefinition::column(
            department.attribute("location", ValueType::Text),
        ))
        .build()
        .expect("department definition");

    let employee = domain.entity_type("employee");
    let employee_department_id = employee.attribute("department_id", ValueType::Integer);
    domain
        .define(&employee)
        .table("emp")
        .key_generator(KeyGenerator::Identity)
        .attribute(AttributeDefinition::primary_key(
            employee.attribute("id", ValueType::Integer),
        ))
        .attribute(
            AttributeDefinition::column(employee.attribute("name", ValueType::Text))
                .nullable(false)
                .max_length(20),
        )
        .attribute(
            AttributeDefinition::column(employee.attribute("salary", ValueType::Real))
                .range(0.0, 10_000.0),
        )
        .attribute(AttributeDefinition::column(employee_department_id.clone()))
        .attribute(
            AttributeDefinition::foreign_key(
                employee.attribute("department", ValueType::Entity),
                &department,
            )
            .reference(&employee_department_id, &department_id),
        )
        .build()
        .expect("employee definition");

    domain
}

pub fn scott() -> User {
    User::new("scott", "tiger")
}

/// Department and employee fixtures
pub mod fixtures {
    use dalmux_core::{Attribute, Entity, EntityType, Key, ValueType};

    use super::domain;

    pub fn department_type() -> EntityType {
        domain().entity_type("department")
    }

    pub fn employee_type() -> EntityType {
        domain().entity_type("employee")
    }

    pub fn department_id() -> Attribute {
        department_type().attribute("id", ValueType::Integer)
    }

    pub fn department_name() -> Attribute {
        department_type().attribute("name", ValueType::Text)
    }

    pub fn department_location() -> Attribute {
        department_type().attribute("location", ValueType::Text)
    }

    pub fn employee_name() -> Attribute {
        employee_type().attribute("name", ValueType::Text)
    }

    pub fn employee_salary() -> Attribute {
        employee_type().attribute("salary", ValueType::Real)
    }

    pub fn employee_department() -> Attribute {
        employee_type().attribute("department", ValueType::Entity)
    }

    pub fn department(id: i64, name: &str) -> Entity {
        let mut entity = domain().entity(&department_type()).expect("department entity");
        entity.put(&department_id(), id).expect("department id");
        entity.put(&department_name(), name).expect("department name");
        entity
    }

    pub fn employee(name: &str, salary: f64, department: &Entity) -> Entity {
        let mut entity = domain().entity(&employee_type()).expect("employee entity");
        entity.put(&employee_name(), name).expect("employee name");
        entity.put(&employee_salary(), salary).expect("employee salary");
        entity
            .put(&employee_department(), department.clone())
            .expect("employee department");
        entity
    }

    pub fn department_key(id: i64) -> Key {
        let definition = domain()
            .definition(&department_type())
            .expect("department definition");
        Key::of(&definition, id).expect("department key")
    }
}

/// Database test helpers
pub mod db {
    use std::sync::Arc;

    use dalmux_storage::{ConnectionPools, PoolConfig, SqliteDatabase, SqliteDialect};
    use tempfile::TempDir;

    use super::SCHEMA;

    /// A file database with the test schema, removed on drop
    pub struct TestDatabase {
        pub pools: Arc<ConnectionPools>,
        _dir: TempDir,
    }

    impl TestDatabase {
        pub fn new() -> Self {
            Self::with_pool(PoolConfig::default())
        }

        pub fn with_pool(config: PoolConfig) -> Self {
            let dir = tempfile::tempdir().expect("temp dir");
            let database = SqliteDatabase::file(dir.path().join("integration.db"), Arc::new(SqliteDialect))
                .expect("open database");
            database.execute_batch(SCHEMA).expect("create schema");
            Self {
                pools: Arc::new(ConnectionPools::new(Arc::new(database), config)),
                _dir: dir,
            }
        }
    }

    impl Default for TestDatabase {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Install a test subscriber once; output only shows for failing tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
