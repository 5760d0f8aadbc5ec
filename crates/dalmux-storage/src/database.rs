//! Physical SQLite databases and connections

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dalmux_core::{Error, Result, User};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dialect::{Dialect, DialectRegistry};

/// Map a driver error onto the dalmux error taxonomy
pub fn sql_error(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Default database file under the platform local data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dalmux")
        .join(crate::DATABASE_FILE)
}

/// Database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` for a file, `sqlite::memory:<name>` for a shared in-memory database
    pub url: String,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    /// SQL scripts run once when the database is opened
    pub init_scripts: Vec<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: format!("sqlite:{}", default_database_path().display()),
            busy_timeout_ms: 5_000,
            foreign_keys: true,
            init_scripts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    /// Shared-cache in-memory database, alive while at least one connection is open
    Memory(String),
}

/// A SQLite database that hands out physical connections.
pub struct SqliteDatabase {
    location: Location,
    dialect: Arc<dyn Dialect>,
    busy_timeout: Duration,
    foreign_keys: bool,
    /// Keeps a shared in-memory database alive
    keeper: Option<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// A database stored in `path`; the parent directory is created if missing
    pub fn file(path: impl AsRef<Path>, dialect: Arc<dyn Dialect>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Configuration(format!(
                    "failed to create database directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        Ok(Self {
            location: Location::File(path),
            dialect,
            busy_timeout: Duration::from_millis(5_000),
            foreign_keys: true,
            keeper: None,
        })
    }

    /// A named in-memory database shared by all connections of this instance
    pub fn memory(name: &str, dialect: Arc<dyn Dialect>) -> Result<Self> {
        let mut database = Self {
            location: Location::Memory(name.to_string()),
            dialect,
            busy_timeout: Duration::from_millis(5_000),
            foreign_keys: true,
            keeper: None,
        };
        database.keeper = Some(Mutex::new(database.open_physical()?));
        Ok(database)
    }

    /// Build from configuration, resolving the dialect from the url
    pub fn from_config(config: &DatabaseConfig, dialects: &DialectRegistry) -> Result<Self> {
        let dialect = dialects.for_url(&config.url)?;
        let target = config
            .url
            .strip_prefix("sqlite:")
            .ok_or_else(|| {
                Error::Configuration(format!("unsupported database url '{}'", config.url))
            })?;

        let mut database = match target.strip_prefix(":memory:") {
            Some(name) => Self::memory(if name.is_empty() { "dalmux" } else { name }, dialect)?,
            None => Self::file(target, dialect)?,
        };
        database.busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        database.foreign_keys = config.foreign_keys;

        for script in &config.init_scripts {
            let sql = std::fs::read_to_string(script).map_err(|e| {
                Error::Configuration(format!("failed to read init script {:?}: {}", script, e))
            })?;
            database.execute_batch(&sql)?;
            info!("[Database] Ran init script {:?}", script);
        }

        Ok(database)
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn url(&self) -> String {
        match &self.location {
            Location::File(path) => format!("sqlite:{}", path.display()),
            Location::Memory(name) => format!("sqlite::memory:{}", name),
        }
    }

    /// Open a new physical connection for `user`.
    ///
    /// SQLite has no users of its own, the user is carried for identification.
    pub fn connect(&self, user: &User) -> Result<DatabaseConnection> {
        let connection = self.open_physical()?;
        debug!("[Database] Opened connection to {} for {}", self.url(), user);
        Ok(DatabaseConnection {
            connection: Some(connection),
            user: user.clone(),
            dialect: Arc::clone(&self.dialect),
            created_at: Instant::now(),
        })
    }

    /// Run a SQL script on a fresh connection
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let connection = self.open_physical()?;
        connection.execute_batch(sql).map_err(sql_error)
    }

    fn open_physical(&self) -> Result<Connection> {
        let connection = match &self.location {
            Location::File(path) => Connection::open(path),
            Location::Memory(name) => Connection::open_with_flags(
                format!("file:{}?mode=memory&cache=shared", name),
                OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI,
            ),
        }
        .map_err(sql_error)?;

        connection
            .busy_timeout(self.busy_timeout)
            .map_err(sql_error)?;
        if self.foreign_keys {
            connection
                .pragma_update(None, "foreign_keys", "ON")
                .map_err(sql_error)?;
        }
        Ok(connection)
    }
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("url", &self.url())
            .field("dialect", &self.dialect.driver_id())
            .finish()
    }
}

/// One physical database connection.
pub struct DatabaseConnection {
    connection: Option<Connection>,
    user: User,
    dialect: Arc<dyn Dialect>,
    created_at: Instant,
}

impl DatabaseConnection {
    /// The driver connection, failing once this connection has been closed
    pub fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::Closed)
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Round trip to the database with the dialect's validity query
    pub fn is_valid(&self) -> bool {
        match &self.connection {
            Some(connection) => connection
                .query_row(self.dialect.validity_query(), [], |_| Ok(()))
                .is_ok(),
            None => false,
        }
    }

    /// Whether the driver reports an open transaction
    pub fn is_transaction_open(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| !c.is_autocommit())
            .unwrap_or(false)
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.connection()?.execute_batch("BEGIN").map_err(sql_error)
    }

    /// Begin a transaction holding the write lock from the start, so a
    /// concurrent writer waits out the busy timeout instead of failing
    /// to upgrade a read lock
    pub fn begin_write_transaction(&self) -> Result<()> {
        self.connection()?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(sql_error)
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.connection()?.execute_batch("COMMIT").map_err(sql_error)
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.connection()?.execute_batch("ROLLBACK").map_err(sql_error)
    }

    /// Close the physical connection; afterwards the connection is invalid
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err((_, e)) = connection.close() {
                warn!("[Database] Failed to close connection for {}: {}", self.user, e);
            }
        }
    }
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("user", &self.user.username())
            .field("open", &self.connection.is_some())
            .finish()
    }
}
