//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the remote (persistent socket) transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteClientConfig {
    /// `host:port` of the remote listener
    pub address: String,
    pub connect_timeout_ms: u64,
    /// Maximum wait for the reply to one call
    pub request_timeout_ms: u64,
    pub max_frame_length: usize,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2223".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

impl RemoteClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings of the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Server base url, e.g. `http://localhost:8080`
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}
