//! HTTP integration tests
//!
//! A real gateway HTTP listener on an ephemeral port, driven through
//! `HttpEntityConnection` and raw requests, plus client failure handling
//! against a mock server.

mod client_errors;
mod endpoints;
mod scenarios;
mod transactions;

use dalmux_client::{HttpClientConfig, HttpEntityConnection};
use dalmux_core::codec::Envelope;
use dalmux_core::protocol::{EntityRequest, DOMAIN_HEADER};
use dalmux_core::{ConnectionRequest, User};
use tests::{domain, scott, DOMAIN};

pub const CLIENT_TYPE: &str = "integration";

pub fn connect_as(address: &str, user: User) -> HttpEntityConnection {
    let request = ConnectionRequest::new(user, CLIENT_TYPE, DOMAIN);
    HttpEntityConnection::connect(domain(), request, &HttpClientConfig::new(address)).unwrap()
}

pub fn connect(address: &str) -> HttpEntityConnection {
    connect_as(address, scott())
}

/// POST an enveloped request with explicit headers
pub async fn post(
    address: &str,
    credentials: Option<(&str, &str)>,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (reqwest::StatusCode, serde_json::Value) {
    let mut builder = reqwest::Client::new()
        .post(format!("{}/entities", address))
        .header("content-type", "application/json")
        .body(body);
    if let Some((username, password)) = credentials {
        builder = builder.basic_auth(username, Some(password));
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = builder.send().await.unwrap();
    let status = response.status();
    let json = response.json::<serde_json::Value>().await.unwrap();
    (status, json)
}

pub fn ping() -> Vec<u8> {
    serde_json::to_vec(&Envelope::new(EntityRequest::Ping)).unwrap()
}

pub fn domain_header() -> (&'static str, &'static str) {
    (DOMAIN_HEADER, DOMAIN)
}

/// The error kind of an enveloped failure outcome
pub fn error_kind(json: &serde_json::Value) -> &str {
    json["payload"]["err"]["error"].as_str().unwrap_or_default()
}

pub async fn pinned_transactions(address: &str) -> u64 {
    let health: serde_json::Value = reqwest::get(format!("{}/health", address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    health["transactions"].as_u64().unwrap()
}
