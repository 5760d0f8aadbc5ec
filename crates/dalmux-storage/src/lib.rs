//! Dalmux Storage Layer
//!
//! The direct database path: SQLite connections, pooling, SQL translation and
//! the local `EntityConnection`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          LocalEntityConnection (EntityConnection)    │
//! ├──────────────────────────────────────────────────────┤
//! │     SQL translation          DatabaseOperations      │
//! │  (conditions, statements)  (functions, reports)      │
//! ├──────────────────────────────────────────────────────┤
//! │      ConnectionPool / ConnectionPools (per user)     │
//! ├──────────────────────────────────────────────────────┤
//! │   SqliteDatabase + Dialect (vendor SQL strategies)   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dalmux_storage::{
//!     ConnectionPools, DialectRegistry, LocalEntityConnection, PoolConfig, SqliteDatabase,
//! };
//! use std::sync::Arc;
//!
//! let dialects = DialectRegistry::default();
//! let database = Arc::new(SqliteDatabase::file(&path, dialects.get("sqlite")?)?);
//! let pools = ConnectionPools::new(database, PoolConfig::default());
//!
//! let pool = pools.get_or_create(&User::new("scott", "tiger"))?;
//! let mut connection = LocalEntityConnection::new(domain, pool.as_ref()).await?;
//! let key = connection.insert(&department).await?;
//! ```

mod database;
pub mod dialect;
mod local;
pub mod operations;
pub mod pool;
pub mod sql;
mod types;

pub use database::{
    default_database_path, sql_error, DatabaseConfig, DatabaseConnection, SqliteDatabase,
};
pub use dialect::{Dialect, DialectRegistry, H2Dialect, OracleDialect, PostgresDialect, SqliteDialect};
pub use local::LocalEntityConnection;
pub use operations::{DatabaseFunction, DatabaseOperations, DatabaseProcedure, ReportFiller};
pub use pool::{
    CheckoutSample, ConnectionPool, ConnectionPools, DefaultConnectionPool, PoolConfig,
    PoolStatistics, PooledConnection,
};

/// Default database file name.
pub const DATABASE_FILE: &str = "dalmux.db";
