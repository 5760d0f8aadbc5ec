//! Connection pooling
//!
//! A [`DefaultConnectionPool`] hands out [`PooledConnection`] guards for one
//! database user. Capacity is enforced with a semaphore: a checkout waits for
//! a permit up to the configured timeout and fails with
//! [`Error::PoolExhausted`] after that. The permit travels with the guard and
//! is released only once the connection is back in the idle list, so a
//! waiting checkout always finds either an idle connection or room to create
//! one.
//!
//! Statistics are atomic counters; the idle list and the snapshot ring have
//! their own short-lived locks, neither held while waiting for a permit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dalmux_core::{Error, Result, User};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::database::{DatabaseConnection, SqliteDatabase};

/// Borrow/return pool of physical connections for one user.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// The database user every connection of this pool belongs to
    fn user(&self) -> &User;

    /// Check out a connection, waiting up to the checkout timeout
    async fn connection(&self) -> Result<PooledConnection>;

    fn statistics(&self) -> PoolStatistics;

    fn reset_statistics(&self);

    /// Destroy idle connections and refuse further checkouts
    fn close(&self);
}

type ReleaseFn = Box<dyn FnOnce(DatabaseConnection) + Send>;

/// A checked out connection, returned to its pool when dropped.
pub struct PooledConnection {
    connection: Option<DatabaseConnection>,
    release: Option<ReleaseFn>,
}

impl PooledConnection {
    fn pooled(connection: DatabaseConnection, release: ReleaseFn) -> Self {
        Self {
            connection: Some(connection),
            release: Some(release),
        }
    }

    /// A connection that belongs to no pool and is closed when dropped
    pub fn unpooled(connection: DatabaseConnection) -> Self {
        Self {
            connection: Some(connection),
            release: None,
        }
    }

    pub fn database_connection(&self) -> Result<&DatabaseConnection> {
        self.connection.as_ref().ok_or(Error::Closed)
    }

    /// The driver connection
    pub fn connection(&self) -> Result<&rusqlite::Connection> {
        self.database_connection()?.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match self.release.take() {
                Some(release) => release(connection),
                None => connection.close(),
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("pooled", &self.release.is_some())
            .finish()
    }
}

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub maximum_size: usize,
    pub checkout_timeout_ms: u64,
    /// Idle connections older than this are destroyed by the cleanup task
    pub idle_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Record every checkout in the snapshot ring
    pub collect_snapshots: bool,
    pub snapshot_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            maximum_size: 8,
            checkout_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            cleanup_interval_ms: 20_000,
            collect_snapshots: false,
            snapshot_size: 1_000,
        }
    }
}

/// One checkout recorded in the snapshot ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSample {
    pub timestamp: DateTime<Utc>,
    pub checkout_us: u64,
    pub in_use: usize,
}

/// Point in time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub username: String,
    pub timestamp: DateTime<Utc>,
    /// Connections in use plus idle connections
    pub size: usize,
    pub in_use: usize,
    pub available: usize,
    pub requests: u64,
    /// Requests that had to wait for a connection
    pub delayed: u64,
    /// Requests that timed out
    pub failed: u64,
    pub created: u64,
    pub destroyed: u64,
    pub minimum_checkout_us: u64,
    pub average_checkout_us: u64,
    pub maximum_checkout_us: u64,
    pub snapshot: Vec<CheckoutSample>,
}

struct IdleConnection {
    connection: DatabaseConnection,
    returned_at: Instant,
}

#[derive(Default)]
struct Counters {
    in_use: AtomicUsize,
    requests: AtomicU64,
    delayed: AtomicU64,
    failed: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    checkouts: AtomicU64,
    total_checkout_us: AtomicU64,
    minimum_checkout_us: AtomicU64,
    maximum_checkout_us: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.requests,
            &self.delayed,
            &self.failed,
            &self.created,
            &self.destroyed,
            &self.checkouts,
            &self.total_checkout_us,
            &self.maximum_checkout_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.minimum_checkout_us.store(u64::MAX, Ordering::Relaxed);
    }

    fn record_checkout(&self, elapsed: Duration) -> u64 {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        self.total_checkout_us.fetch_add(micros, Ordering::Relaxed);
        self.minimum_checkout_us.fetch_min(micros, Ordering::Relaxed);
        self.maximum_checkout_us.fetch_max(micros, Ordering::Relaxed);
        micros
    }
}

struct PoolShared {
    database: Arc<SqliteDatabase>,
    user: User,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    counters: Counters,
    snapshot: Mutex<VecDeque<CheckoutSample>>,
    closed: AtomicBool,
}

impl PoolShared {
    fn release(&self, mut connection: DatabaseConnection) {
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);

        if self.closed.load(Ordering::Acquire) || !connection.is_valid() {
            debug!(
                "[Pool] Discarding connection for {}",
                self.user.username()
            );
            connection.close();
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if connection.is_transaction_open() {
            warn!(
                "[Pool] Connection for {} returned with an open transaction, rolling back",
                self.user.username()
            );
            if let Err(e) = connection.rollback_transaction() {
                warn!("[Pool] Rollback on return failed: {}", e);
                connection.close();
                self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        self.idle.lock().push_back(IdleConnection {
            connection,
            returned_at: Instant::now(),
        });
    }

    fn destroy_idle(&self, predicate: impl Fn(&IdleConnection) -> bool) -> usize {
        let removed: VecDeque<IdleConnection> = {
            let mut idle = self.idle.lock();
            let (removed, kept): (VecDeque<_>, VecDeque<_>) =
                idle.drain(..).partition(|c| predicate(c));
            *idle = kept;
            removed
        };

        let count = removed.len();
        for mut idle in removed {
            idle.connection.close();
        }
        self.counters
            .destroyed
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    fn record_sample(&self, checkout_us: u64, in_use: usize) {
        if !self.config.collect_snapshots || self.config.snapshot_size == 0 {
            return;
        }
        let mut snapshot = self.snapshot.lock();
        if snapshot.len() == self.config.snapshot_size {
            snapshot.pop_front();
        }
        snapshot.push_back(CheckoutSample {
            timestamp: Utc::now(),
            checkout_us,
            in_use,
        });
    }
}

/// The bundled pool implementation.
#[derive(Clone)]
pub struct DefaultConnectionPool {
    shared: Arc<PoolShared>,
}

impl DefaultConnectionPool {
    pub fn new(database: Arc<SqliteDatabase>, user: User, config: PoolConfig) -> Self {
        let counters = Counters::default();
        counters.minimum_checkout_us.store(u64::MAX, Ordering::Relaxed);

        info!(
            "[Pool] Created pool for {} on {} (maximum size {})",
            user.username(),
            database.url(),
            config.maximum_size
        );

        Self {
            shared: Arc::new(PoolShared {
                database,
                user,
                permits: Arc::new(Semaphore::new(config.maximum_size)),
                config,
                idle: Mutex::new(VecDeque::new()),
                counters,
                snapshot: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Destroy idle connections past the idle timeout, returning how many were removed
    pub fn cleanup_idle(&self) -> usize {
        let timeout = Duration::from_millis(self.shared.config.idle_timeout_ms);
        let removed = self
            .shared
            .destroy_idle(|idle| idle.returned_at.elapsed() >= timeout);
        if removed > 0 {
            debug!(
                "[Pool] Removed {} idle connections for {}",
                removed,
                self.shared.user.username()
            );
        }
        removed
    }

    /// Run [`cleanup_idle`](Self::cleanup_idle) periodically until the pool is closed or dropped
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let shared: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let period = Duration::from_millis(self.shared.config.cleanup_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                DefaultConnectionPool { shared }.cleanup_idle();
            }
        })
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permits = Arc::clone(&self.shared.permits);
        if let Ok(permit) = Arc::clone(&permits).try_acquire_owned() {
            return Ok(permit);
        }

        self.shared.counters.delayed.fetch_add(1, Ordering::Relaxed);
        let timeout = Duration::from_millis(self.shared.config.checkout_timeout_ms);
        match tokio::time::timeout(timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is closed together with the pool
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "[Pool] Checkout for {} timed out after {}ms",
                    self.shared.user.username(),
                    self.shared.config.checkout_timeout_ms
                );
                Err(Error::PoolExhausted {
                    waited_ms: self.shared.config.checkout_timeout_ms,
                })
            }
        }
    }
}

#[async_trait]
impl ConnectionPool for DefaultConnectionPool {
    fn user(&self) -> &User {
        &self.shared.user
    }

    async fn connection(&self) -> Result<PooledConnection> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let started = Instant::now();
        self.shared.counters.requests.fetch_add(1, Ordering::Relaxed);
        let permit = self.acquire().await?;

        let idle = self.shared.idle.lock().pop_back();
        let connection = match idle {
            Some(idle) => idle.connection,
            None => {
                let connection = self.shared.database.connect(&self.shared.user)?;
                self.shared.counters.created.fetch_add(1, Ordering::Relaxed);
                connection
            }
        };

        let in_use = self.shared.counters.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        let checkout_us = self.shared.counters.record_checkout(started.elapsed());
        self.shared.record_sample(checkout_us, in_use);

        let shared = Arc::clone(&self.shared);
        Ok(PooledConnection::pooled(
            connection,
            Box::new(move |connection| {
                shared.release(connection);
                drop(permit);
            }),
        ))
    }

    fn statistics(&self) -> PoolStatistics {
        let counters = &self.shared.counters;
        let in_use = counters.in_use.load(Ordering::Relaxed);
        let available = self.shared.idle.lock().len();
        let checkouts = counters.checkouts.load(Ordering::Relaxed);
        let minimum = counters.minimum_checkout_us.load(Ordering::Relaxed);

        PoolStatistics {
            username: self.shared.user.username().to_string(),
            timestamp: Utc::now(),
            size: in_use + available,
            in_use,
            available,
            requests: counters.requests.load(Ordering::Relaxed),
            delayed: counters.delayed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            created: counters.created.load(Ordering::Relaxed),
            destroyed: counters.destroyed.load(Ordering::Relaxed),
            minimum_checkout_us: if checkouts == 0 { 0 } else { minimum },
            average_checkout_us: counters
                .total_checkout_us
                .load(Ordering::Relaxed)
                .checked_div(checkouts)
                .unwrap_or(0),
            maximum_checkout_us: counters.maximum_checkout_us.load(Ordering::Relaxed),
            snapshot: self.shared.snapshot.lock().iter().cloned().collect(),
        }
    }

    fn reset_statistics(&self) {
        self.shared.counters.reset();
        self.shared.snapshot.lock().clear();
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.permits.close();
        let removed = self.shared.destroy_idle(|_| true);
        info!(
            "[Pool] Closed pool for {} ({} idle connections destroyed)",
            self.shared.user.username(),
            removed
        );
    }
}

/// Pools keyed by database username.
pub struct ConnectionPools {
    database: Arc<SqliteDatabase>,
    config: PoolConfig,
    pools: DashMap<String, DefaultConnectionPool>,
}

impl ConnectionPools {
    pub fn new(database: Arc<SqliteDatabase>, config: PoolConfig) -> Self {
        Self {
            database,
            config,
            pools: DashMap::new(),
        }
    }

    pub fn database(&self) -> &Arc<SqliteDatabase> {
        &self.database
    }

    /// The pool for `user`, created on first use.
    ///
    /// Fails with an authentication error when a pool exists for the
    /// username but was created with a different password.
    pub fn get_or_create(&self, user: &User) -> Result<Arc<dyn ConnectionPool>> {
        if let Some(pool) = self.pools.get(user.username()) {
            if pool.user().password() != user.password() {
                return Err(Error::Authentication(format!(
                    "password mismatch for database user '{}'",
                    user.username()
                )));
            }
            return Ok(Arc::new(pool.clone()));
        }

        let pool = self
            .pools
            .entry(user.username().to_string())
            .or_insert_with(|| {
                let pool =
                    DefaultConnectionPool::new(Arc::clone(&self.database), user.clone(), self.config.clone());
                if tokio::runtime::Handle::try_current().is_ok() {
                    pool.spawn_cleanup();
                }
                pool
            })
            .clone();
        Ok(Arc::new(pool))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.pools.contains_key(username)
    }

    pub fn statistics(&self) -> Vec<PoolStatistics> {
        let mut statistics: Vec<PoolStatistics> =
            self.pools.iter().map(|p| p.value().statistics()).collect();
        statistics.sort_by(|a, b| a.username.cmp(&b.username));
        statistics
    }

    pub fn close_all(&self) {
        for pool in self.pools.iter() {
            pool.value().close();
        }
        self.pools.clear();
    }
}
