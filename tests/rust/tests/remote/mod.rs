//! Remote connection integration tests
//!
//! A real gateway remote listener on an ephemeral port, driven through
//! `RemoteEntityConnection`.

mod scenarios;
mod sessions;

use dalmux_client::{RemoteClientConfig, RemoteEntityConnection};
use dalmux_core::{ConnectionRequest, Result, User};
use tests::{domain, scott, DOMAIN};

pub const CLIENT_TYPE: &str = "integration";

pub fn request(user: User) -> ConnectionRequest {
    ConnectionRequest::new(user, CLIENT_TYPE, DOMAIN)
}

pub async fn try_connect(address: &str, request: ConnectionRequest) -> Result<RemoteEntityConnection> {
    RemoteEntityConnection::connect(domain(), request, &RemoteClientConfig::new(address)).await
}

pub async fn connect(address: &str) -> RemoteEntityConnection {
    try_connect(address, request(scott())).await.unwrap()
}
