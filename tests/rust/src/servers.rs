//! Gateway harness: an entity server over a temporary database, with the
//! remote and HTTP listeners bound to ephemeral ports.

use std::sync::Arc;

use dalmux_core::{Result, Value};
use dalmux_gateway::{
    EntityServer, HttpConfig, HttpServer, LoginUser, RemoteConfig, RemoteServer, SessionConfig,
    StaticLoginProxy,
};
use dalmux_storage::{sql_error, DatabaseOperations, PoolConfig, ReportFiller};
use rusqlite::Connection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::TestDatabase;

/// A listener serving in the background until dropped
pub struct RunningServer {
    pub address: String,
    token: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    /// Cancel the listener and wait for it to wind down
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.token.cancel();
        (&mut self.handle).await?
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct ServerHarness {
    pub server: Arc<EntityServer>,
    pub database: TestDatabase,
}

/// `name@location` per department, ordered by name
struct LocationReport;

impl ReportFiller for LocationReport {
    fn fill(&self, connection: &Connection, _: &[Value]) -> Result<Value> {
        let mut statement = connection
            .prepare("SELECT name, location FROM dept ORDER BY name")
            .map_err(sql_error)?;
        let lines = statement
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let location: Option<String> = row.get(1)?;
                Ok(format!("{}@{}", name, location.unwrap_or_default()))
            })
            .map_err(sql_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sql_error)?;
        Ok(Value::Text(lines.join("\n")))
    }
}

/// Operations every harness registers
pub fn operations() -> DatabaseOperations {
    DatabaseOperations::new()
        .with_function(
            "department_count",
            |connection: &Connection, _: &[Value]| -> Result<Value> {
                let count: i64 = connection
                    .query_row("SELECT COUNT(*) FROM dept", [], |row| row.get(0))
                    .map_err(sql_error)?;
                Ok(Value::Integer(count))
            },
        )
        .with_procedure(
            "relocate_all",
            |connection: &Connection, arguments: &[Value]| -> Result<()> {
                let location = arguments.first().and_then(Value::as_str).unwrap_or_default();
                connection
                    .execute("UPDATE dept SET location = ?1", [location])
                    .map_err(sql_error)?;
                Ok(())
            },
        )
        .with_report("locations", LocationReport)
}

impl ServerHarness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default(), PoolConfig::default())
    }

    pub fn with_config(sessions: SessionConfig, pool: PoolConfig) -> Self {
        Self::with_users(sessions, pool, &[])
    }

    /// Configured users are checked by a static login proxy
    pub fn with_users(sessions: SessionConfig, pool: PoolConfig, users: &[LoginUser]) -> Self {
        crate::domain();
        let database = TestDatabase::with_pool(pool);
        let mut server =
            EntityServer::new(sessions, Arc::clone(&database.pools)).with_operations(operations());
        if !users.is_empty() {
            server = server.with_login_proxy(Arc::new(StaticLoginProxy::new(users)));
        }
        Self {
            server: Arc::new(server),
            database,
        }
    }

    /// Serve the remote protocol on an ephemeral port
    pub async fn start_remote(&self) -> RunningServer {
        let config = RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let remote = RemoteServer::new(Arc::clone(&self.server), config);
        let listener = remote.bind().await.expect("bind remote listener");
        let address = listener.local_addr().expect("local addr").to_string();

        let token = CancellationToken::new();
        let handle = tokio::spawn(remote.serve(listener, token.clone()));
        RunningServer {
            address,
            token,
            handle,
        }
    }

    /// Serve HTTP on an ephemeral port; `address` is the base url
    pub async fn start_http(&self, transaction_timeout_ms: u64) -> RunningServer {
        let config = HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            transaction_timeout_ms,
            ..Default::default()
        };
        let http = HttpServer::new(Arc::clone(&self.server), config);
        let listener = http.bind().await.expect("bind http listener");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));

        let token = CancellationToken::new();
        let handle = tokio::spawn(http.serve(listener, token.clone()));
        RunningServer {
            address,
            token,
            handle,
        }
    }
}

impl Default for ServerHarness {
    fn default() -> Self {
        Self::new()
    }
}
