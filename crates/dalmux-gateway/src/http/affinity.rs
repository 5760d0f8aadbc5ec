//! Session affinity of HTTP requests
//!
//! HTTP calls are stateless: each borrows a local connection for the request
//! only. Beginning a transaction is the one exception; the connection is then
//! pinned under a session token until commit, rollback or an idle timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dalmux_core::{EntityConnection, Error, RemoteClient, Result};
use dalmux_storage::LocalEntityConnection;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where one request runs.
pub enum Affinity {
    /// On a connection borrowed for this request
    Stateless,
    /// On the connection pinned to the caller's open transaction
    Pinned(Arc<PinnedTransaction>),
}

pub struct PinnedTransaction {
    token: String,
    client_id: Uuid,
    username: String,
    connection: tokio::sync::Mutex<LocalEntityConnection>,
    last_access: Mutex<Instant>,
}

impl PinnedTransaction {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn connection(&self) -> &tokio::sync::Mutex<LocalEntityConnection> {
        self.touch();
        &self.connection
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_time(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

/// Connections pinned to open HTTP transactions, keyed by session token.
pub struct Transactions {
    pinned: DashMap<String, Arc<PinnedTransaction>>,
    timeout: Duration,
}

impl Transactions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pinned: DashMap::new(),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    /// Affinity of a request carrying `token`, checked against the calling client
    pub fn resolve(&self, token: Option<&str>, client: &RemoteClient) -> Result<Affinity> {
        let Some(token) = token else {
            return Ok(Affinity::Stateless);
        };
        let pinned = self
            .pinned
            .get(token)
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::Transaction(format!("session {} is unknown or expired", token)))?;

        if pinned.client_id != client.client_id() || pinned.username != client.user().username() {
            return Err(Error::Authentication(format!(
                "session {} belongs to another client",
                token
            )));
        }
        Ok(Affinity::Pinned(pinned))
    }

    /// Pin a connection with an open transaction, returning its session token
    pub fn pin(&self, client: &RemoteClient, connection: LocalEntityConnection) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let pinned = Arc::new(PinnedTransaction {
            token: token.clone(),
            client_id: client.client_id(),
            username: client.user().username().to_string(),
            connection: tokio::sync::Mutex::new(connection),
            last_access: Mutex::new(Instant::now()),
        });
        self.pinned.insert(token.clone(), pinned);
        debug!("[Http] Pinned transaction {} for {}", token, client);
        token
    }

    /// Unpin and close; a transaction still open is rolled back
    pub async fn release(&self, token: &str) -> bool {
        let Some((_, pinned)) = self.pinned.remove(token) else {
            return false;
        };
        let mut connection = pinned.connection.lock().await;
        if let Err(e) = connection.close().await {
            warn!("[Http] Closing pinned connection {} failed: {}", token, e);
        }
        debug!("[Http] Released transaction {}", token);
        true
    }

    /// Roll back and release transactions idle beyond the timeout
    pub async fn sweep(&self) -> usize {
        let expired: Vec<String> = self
            .pinned
            .iter()
            .filter(|entry| {
                let pinned = entry.value();
                pinned.idle_time() >= self.timeout && pinned.connection.try_lock().is_ok()
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = 0;
        for token in expired {
            if self.release(&token).await {
                released += 1;
            }
        }
        if released > 0 {
            info!("[Http] Rolled back {} idle transaction(s)", released);
        }
        released
    }

    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let transactions = Arc::clone(self);
        let period = (self.timeout / 4).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        transactions.sweep().await;
                    }
                }
            }
        })
    }

    /// Release every pinned transaction
    pub async fn release_all(&self) {
        let tokens: Vec<String> = self.pinned.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            self.release(&token).await;
        }
    }
}
