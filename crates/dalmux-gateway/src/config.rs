//! Server configuration
//!
//! Loaded from a JSON file, then selectively overridden from `DALMUX_*`
//! environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use dalmux_core::{Error, Result};
use dalmux_storage::{DatabaseConfig, PoolConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_REMOTE_PORT: u16 = 2223;
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Settings of the remote (socket) listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub max_frame_length: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REMOTE_PORT,
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

impl RemoteConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }
}

/// Settings of the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// A transaction left idle this long is rolled back and unpinned
    pub transaction_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_HTTP_PORT,
            enable_cors: false,
            transaction_timeout_ms: 120_000,
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

/// Remote session limits and idle handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent remote sessions
    pub connection_limit: usize,
    pub idle_timeout_ms: u64,
    /// Idle timeouts overriding the default per client type
    pub client_type_timeouts_ms: BTreeMap<String, u64>,
    pub reaper_interval_ms: u64,
    /// Check rows for concurrent modification before updating them
    pub optimistic_locking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_limit: 100,
            idle_timeout_ms: 30 * 60 * 1000,
            client_type_timeouts_ms: BTreeMap::new(),
            reaper_interval_ms: 30_000,
            optimistic_locking: true,
        }
    }
}

impl SessionConfig {
    /// Idle timeout for sessions of `client_type`
    pub fn idle_timeout(&self, client_type: &str) -> Duration {
        let millis = self
            .client_type_timeouts_ms
            .get(client_type)
            .copied()
            .unwrap_or(self.idle_timeout_ms);
        Duration::from_millis(millis)
    }
}

/// A user accepted by the static login proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginUser {
    pub username: String,
    /// Lowercase hex SHA-256 digest of the password
    pub password_sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub remote: RemoteConfig,
    pub http: HttpConfig,
    pub sessions: SessionConfig,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    /// Users of the static login proxy; empty disables it
    pub users: Vec<LoginUser>,
}

impl ServerConfig {
    /// Read a JSON configuration file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("invalid configuration {}: {}", path.display(), e))
        })?;
        info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("DALMUX_HOST") {
            self.remote.host = host.clone();
            self.http.host = host;
        }
        if let Some(port) = var("DALMUX_REMOTE_PORT") {
            self.remote.port = parse_var("DALMUX_REMOTE_PORT", &port)?;
        }
        if let Some(port) = var("DALMUX_HTTP_PORT") {
            self.http.port = parse_var("DALMUX_HTTP_PORT", &port)?;
        }
        if let Some(url) = var("DALMUX_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(size) = var("DALMUX_POOL_SIZE") {
            self.pool.maximum_size = parse_var("DALMUX_POOL_SIZE", &size)?;
        }
        if let Some(limit) = var("DALMUX_CONNECTION_LIMIT") {
            self.sessions.connection_limit = parse_var("DALMUX_CONNECTION_LIMIT", &limit)?;
        }
        if let Some(timeout) = var("DALMUX_IDLE_TIMEOUT_MS") {
            self.sessions.idle_timeout_ms = parse_var("DALMUX_IDLE_TIMEOUT_MS", &timeout)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{} has an invalid value: {}", name, value)))
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid address {}:{}: {}", host, port, e)))
}
