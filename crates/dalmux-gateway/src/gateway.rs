//! Gateway startup: opens the database, builds the entity server and runs
//! both listeners until cancelled.

use std::sync::Arc;

use anyhow::Context;
use dalmux_storage::{ConnectionPools, DatabaseOperations, DialectRegistry, SqliteDatabase};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::http::HttpServer;
use crate::login::StaticLoginProxy;
use crate::remote::RemoteServer;
use crate::server::EntityServer;

pub struct Gateway {
    config: ServerConfig,
    server: Arc<EntityServer>,
}

impl Gateway {
    pub fn new(config: ServerConfig, server: EntityServer) -> Self {
        Self {
            config,
            server: Arc::new(server),
        }
    }

    /// Build an entity server from configuration.
    ///
    /// Configured users enable the static login proxy for every client.
    pub fn open_server(
        config: &ServerConfig,
        operations: DatabaseOperations,
    ) -> anyhow::Result<EntityServer> {
        let dialects = DialectRegistry::default();
        let database = SqliteDatabase::from_config(&config.database, &dialects)
            .with_context(|| format!("failed to open database {}", config.database.url))?;
        info!("[Gateway] Database {}", database.url());

        let pools = Arc::new(ConnectionPools::new(Arc::new(database), config.pool.clone()));
        let mut server = EntityServer::new(config.sessions.clone(), pools).with_operations(operations);

        if config.users.is_empty() {
            warn!("[Gateway] No login users configured, clients are not authenticated");
        } else {
            let proxy = StaticLoginProxy::new(&config.users);
            info!("[Gateway] Static login proxy with {} user(s)", proxy.len());
            server = server.with_login_proxy(Arc::new(proxy));
        }
        Ok(server)
    }

    pub fn server(&self) -> &Arc<EntityServer> {
        &self.server
    }

    /// Run the enabled listeners until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let reaper = self.server.spawn_reaper(token.clone());

        let remote = async {
            if !self.config.remote.enabled {
                return Ok(());
            }
            let remote = RemoteServer::new(Arc::clone(&self.server), self.config.remote.clone());
            let listener = remote.bind().await?;
            remote.serve(listener, token.clone()).await
        };
        let http = async {
            if !self.config.http.enabled {
                return Ok(());
            }
            let http = HttpServer::new(Arc::clone(&self.server), self.config.http.clone());
            let listener = http.bind().await?;
            http.serve(listener, token.clone()).await
        };

        let result = tokio::try_join!(remote, http);
        if result.is_err() {
            token.cancel();
        }

        reaper.abort();
        self.server.shutdown().await;
        result.map(|_| ())
    }
}
