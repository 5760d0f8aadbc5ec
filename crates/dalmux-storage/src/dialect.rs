//! Vendor SQL strategies
//!
//! Everything vendor specific the local connection needs (generated key
//! retrieval, row locking, paging) goes through a [`Dialect`]. Dialects are
//! selected by driver id from a [`DialectRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dalmux_core::{Error, Result};

pub trait Dialect: Send + Sync + fmt::Debug {
    /// Driver identifier this dialect is registered under
    fn driver_id(&self) -> &'static str;

    /// Query returning the identity value generated by the last insert
    fn auto_increment_query(&self, table: &str, column: &str) -> Result<String>;

    /// Query returning the next value of a sequence
    fn sequence_query(&self, sequence: &str) -> Result<String>;

    /// Clause appended to a select to lock the selected rows, if supported
    fn lock_clause(&self) -> Option<&'static str>;

    /// Paging clause appended to a select, empty when neither is given
    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            (None, Some(offset)) => format!("OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    /// Lightweight query used to check that a connection is alive
    fn validity_query(&self) -> &'static str {
        "SELECT 1"
    }
}

#[derive(Debug, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn auto_increment_query(&self, _table: &str, _column: &str) -> Result<String> {
        Ok("SELECT last_insert_rowid()".to_string())
    }

    fn sequence_query(&self, sequence: &str) -> Result<String> {
        Err(Error::Unsupported(format!(
            "sequences are not supported by SQLite ({})",
            sequence
        )))
    }

    fn lock_clause(&self) -> Option<&'static str> {
        // Writers lock the whole database
        None
    }

    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            // OFFSET requires a LIMIT in SQLite
            (None, Some(offset)) => format!("LIMIT -1 OFFSET {}", offset),
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn driver_id(&self) -> &'static str {
        "postgresql"
    }

    fn auto_increment_query(&self, table: &str, column: &str) -> Result<String> {
        Ok(format!(
            "SELECT currval(pg_get_serial_sequence('{}', '{}'))",
            table, column
        ))
    }

    fn sequence_query(&self, sequence: &str) -> Result<String> {
        Ok(format!("SELECT nextval('{}')", sequence))
    }

    fn lock_clause(&self) -> Option<&'static str> {
        Some("FOR UPDATE NOWAIT")
    }
}

#[derive(Debug, Default)]
pub struct H2Dialect;

impl Dialect for H2Dialect {
    fn driver_id(&self) -> &'static str {
        "h2"
    }

    fn auto_increment_query(&self, _table: &str, _column: &str) -> Result<String> {
        Ok("CALL IDENTITY()".to_string())
    }

    fn sequence_query(&self, sequence: &str) -> Result<String> {
        Ok(format!("SELECT NEXT VALUE FOR {}", sequence))
    }

    fn lock_clause(&self) -> Option<&'static str> {
        Some("FOR UPDATE")
    }
}

#[derive(Debug, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn driver_id(&self) -> &'static str {
        "oracle"
    }

    /// Oracle identities are backed by a sequence named after the column
    fn auto_increment_query(&self, _table: &str, column: &str) -> Result<String> {
        Ok(format!("SELECT {}.CURRVAL FROM DUAL", column))
    }

    fn sequence_query(&self, sequence: &str) -> Result<String> {
        Ok(format!("SELECT {}.NEXTVAL FROM DUAL", sequence))
    }

    fn lock_clause(&self) -> Option<&'static str> {
        Some("FOR UPDATE NOWAIT")
    }

    fn limit_offset_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut clause = String::new();
        if let Some(offset) = offset {
            clause.push_str(&format!("OFFSET {} ROWS", offset));
        }
        if let Some(limit) = limit {
            if !clause.is_empty() {
                clause.push(' ');
            }
            clause.push_str(&format!("FETCH NEXT {} ROWS ONLY", limit));
        }
        clause
    }

    fn validity_query(&self) -> &'static str {
        "SELECT 1 FROM DUAL"
    }
}

/// Dialects keyed by driver id.
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            dialects: HashMap::new(),
        }
    }

    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.dialects
            .insert(dialect.driver_id().to_string(), dialect);
    }

    /// Dialect for a driver id, e.g. `sqlite`
    pub fn get(&self, driver_id: &str) -> Result<Arc<dyn Dialect>> {
        self.dialects
            .get(&driver_id.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no dialect for driver '{}'", driver_id)))
    }

    /// Resolve the dialect from a database url such as `sqlite:/path/db` or `jdbc:h2:mem:`
    pub fn for_url(&self, url: &str) -> Result<Arc<dyn Dialect>> {
        let url = url.strip_prefix("jdbc:").unwrap_or(url);
        let driver_id = url.split(':').next().unwrap_or_default();
        self.get(driver_id)
    }

    pub fn driver_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.dialects.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}

impl Default for DialectRegistry {
    /// All bundled dialects
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SqliteDialect));
        registry.register(Arc::new(PostgresDialect));
        registry.register(Arc::new(H2Dialect));
        registry.register(Arc::new(OracleDialect));
        registry
    }
}
