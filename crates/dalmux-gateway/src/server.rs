//! Entity server: login, session registry and idle-session reaping
//!
//! The [`EntityServer`] is shared by both transports. Remote clients get a
//! long-lived [`Session`] holding a dedicated local connection; HTTP
//! requests borrow a fresh local connection per call through
//! [`EntityServer::open_connection`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dalmux_core::domain::registry;
use dalmux_core::protocol::{EntityRequest, EntityResponse};
use dalmux_core::{ConnectionRequest, Domain, EntityConnection, Error, RemoteClient, Result};
use dalmux_storage::{
    ConnectionPools, DatabaseOperations, LocalEntityConnection, PoolStatistics,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::dispatch::dispatch;
use crate::login::LoginProxy;

/// One logged-in remote client and its dedicated connection.
pub struct Session {
    client: RemoteClient,
    connection: tokio::sync::Mutex<LocalEntityConnection>,
    last_access: Mutex<Instant>,
}

impl Session {
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn idle_time(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Execute one request on the session's connection
    pub async fn handle(&self, request: EntityRequest) -> Result<EntityResponse> {
        self.touch();
        let mut connection = self.connection.lock().await;
        let result = dispatch(&mut *connection, request).await;
        self.touch();
        result
    }
}

/// Snapshot of one session for statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub client_id: Uuid,
    pub username: String,
    pub client_type: String,
    pub client_host: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatistics {
    pub started_at: DateTime<Utc>,
    pub connection_limit: usize,
    pub session_count: usize,
    pub sessions: Vec<SessionInfo>,
    pub pools: Vec<PoolStatistics>,
}

pub struct EntityServer {
    config: SessionConfig,
    pools: Arc<ConnectionPools>,
    operations: Arc<DatabaseOperations>,
    login_proxies: Vec<Arc<dyn LoginProxy>>,
    client_type_proxies: HashMap<String, Vec<Arc<dyn LoginProxy>>>,
    sessions: DashMap<Uuid, Arc<Session>>,
    started_at: DateTime<Utc>,
}

impl EntityServer {
    pub fn new(config: SessionConfig, pools: Arc<ConnectionPools>) -> Self {
        Self {
            config,
            pools,
            operations: Arc::new(DatabaseOperations::default()),
            login_proxies: Vec::new(),
            client_type_proxies: HashMap::new(),
            sessions: DashMap::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_operations(mut self, operations: DatabaseOperations) -> Self {
        self.operations = Arc::new(operations);
        self
    }

    /// Add a proxy run for every client
    pub fn with_login_proxy(mut self, proxy: Arc<dyn LoginProxy>) -> Self {
        self.login_proxies.push(proxy);
        self
    }

    /// Add a proxy run only for clients of `client_type`
    pub fn with_client_type_proxy(
        mut self,
        client_type: impl Into<String>,
        proxy: Arc<dyn LoginProxy>,
    ) -> Self {
        self.client_type_proxies
            .entry(client_type.into())
            .or_default()
            .push(proxy);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn pools(&self) -> &Arc<ConnectionPools> {
        &self.pools
    }

    fn proxies_for<'a>(&'a self, client_type: &str) -> impl Iterator<Item = &'a Arc<dyn LoginProxy>> {
        self.login_proxies.iter().chain(
            self.client_type_proxies
                .get(client_type)
                .into_iter()
                .flatten(),
        )
    }

    /// Validate a connection request through the login proxy chain
    pub async fn authenticate(
        &self,
        request: ConnectionRequest,
        client_host: Option<String>,
    ) -> Result<(RemoteClient, Arc<Domain>)> {
        let domain = registry::domain(&request.domain).ok_or_else(|| {
            Error::Configuration(format!("domain {} is not available", request.domain))
        })?;

        let mut client = RemoteClient::new(request);
        if let Some(host) = client_host {
            client = client.with_client_host(host);
        }

        let client_type = client.client_type().to_string();
        for proxy in self.proxies_for(&client_type) {
            client = proxy.validate(client).await.map_err(|e| {
                debug!("[Server] Login proxy {} rejected: {}", proxy.name(), e);
                e
            })?;
        }
        Ok((client, domain))
    }

    /// A local connection for an authenticated client, not registered as a session
    pub async fn open_connection(
        &self,
        client: &RemoteClient,
        domain: Arc<Domain>,
    ) -> Result<LocalEntityConnection> {
        let pool = self.pools.get_or_create(client.database_user())?;
        let connection = LocalEntityConnection::new(domain, pool.as_ref())
            .await?
            .with_operations(Arc::clone(&self.operations))
            .with_optimistic_locking(self.config.optimistic_locking);
        Ok(connection)
    }

    /// Log in and open a session, or return the live session of the same client id
    pub async fn connect(
        &self,
        request: ConnectionRequest,
        client_host: Option<String>,
    ) -> Result<Arc<Session>> {
        if let Some(session) = self.reconnect(&request)? {
            return Ok(session);
        }
        if self.sessions.len() >= self.config.connection_limit {
            warn!(
                "[Server] Connection limit of {} reached, rejecting {}",
                self.config.connection_limit, request.user
            );
            return Err(Error::Authentication(format!(
                "connection limit of {} reached",
                self.config.connection_limit
            )));
        }

        let (client, domain) = self.authenticate(request, client_host).await?;
        let connection = self.open_connection(&client, domain).await?;
        let session = Arc::new(Session {
            client,
            connection: tokio::sync::Mutex::new(connection),
            last_access: Mutex::new(Instant::now()),
        });

        self.sessions
            .insert(session.client.client_id(), Arc::clone(&session));
        info!(
            "[Server] Connected {} ({} sessions)",
            session.client,
            self.sessions.len()
        );
        Ok(session)
    }

    fn reconnect(&self, request: &ConnectionRequest) -> Result<Option<Arc<Session>>> {
        let Some(session) = self.session(&request.client_id) else {
            return Ok(None);
        };
        if session.client.user() != &request.user {
            return Err(Error::Authentication(format!(
                "client {} is connected as another user",
                request.client_id
            )));
        }
        session.touch();
        info!("[Server] Reconnected {}", session.client);
        Ok(Some(session))
    }

    pub fn session(&self, client_id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(client_id).map(|s| s.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// End a session: roll back, return its connection to the pool, run logout hooks
    pub async fn disconnect(&self, client_id: &Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(client_id) else {
            return false;
        };
        self.close_session(&session).await;
        info!(
            "[Server] Disconnected {} ({} sessions)",
            session.client,
            self.sessions.len()
        );
        true
    }

    async fn close_session(&self, session: &Session) {
        let mut connection = session.connection.lock().await;
        if let Err(e) = connection.close().await {
            warn!("[Server] Closing connection of {} failed: {}", session.client, e);
        }
        drop(connection);

        let client_type = session.client.client_type().to_string();
        for proxy in self.proxies_for(&client_type) {
            proxy.logout(&session.client).await;
        }
    }

    /// Disconnect sessions idle beyond their client type's timeout.
    ///
    /// Sessions with a call in progress are skipped.
    pub async fn reap_idle(&self) -> usize {
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.idle_time() >= self.config.idle_timeout(session.client.client_type())
                    && session.connection.try_lock().is_ok()
            })
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for client_id in expired {
            if self.disconnect(&client_id).await {
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!("[Server] Reaped {} idle session(s)", reaped);
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) periodically until `token` is cancelled
    pub fn spawn_reaper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let server = Arc::clone(self);
        let period = Duration::from_millis(self.config.reaper_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        server.reap_idle().await;
                    }
                }
            }
            debug!("[Server] Session reaper stopped");
        })
    }

    pub fn statistics(&self) -> ServerStatistics {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionInfo {
                    client_id: session.client.client_id(),
                    username: session.client.user().username().to_string(),
                    client_type: session.client.client_type().to_string(),
                    client_host: session.client.client_host().map(str::to_string),
                    connected_at: session.client.connected_at(),
                    idle_ms: session.idle_time().as_millis() as u64,
                }
            })
            .collect();
        sessions.sort_by_key(|s| s.connected_at);

        ServerStatistics {
            started_at: self.started_at,
            connection_limit: self.config.connection_limit,
            session_count: sessions.len(),
            sessions,
            pools: self.pools.statistics(),
        }
    }

    /// Disconnect every session and close all pools
    pub async fn shutdown(&self) {
        let client_ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for client_id in client_ids {
            self.disconnect(&client_id).await;
        }
        self.pools.close_all();
        info!("[Server] Shut down");
    }
}
