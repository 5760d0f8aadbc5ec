//! HTTP transport: one enveloped JSON request per call
//!
//! Calls are stateless unless a transaction is open. Beginning a transaction
//! returns a session token in the [`SESSION_HEADER`] response header; the
//! client sends it back on every call until commit or rollback so the server
//! can route them to the same database connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dalmux_core::codec::Envelope;
use dalmux_core::protocol::{
    EntityRequest, Outcome, CLIENT_ID_HEADER, CLIENT_TYPE_HEADER, DOMAIN_HEADER, SESSION_HEADER,
};
use dalmux_core::{ConnectionRequest, Domain, Error, Result};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpClientConfig;
use crate::proxy::{Channel, ProxyConnection};

/// Path of the entity endpoint below the base url
pub const ENTITIES_PATH: &str = "entities";

/// `EntityConnection` over the HTTP transport.
pub type HttpEntityConnection = ProxyConnection<HttpChannel>;

pub struct HttpChannel {
    client: Client,
    endpoint: Url,
    request: ConnectionRequest,
    session: Option<String>,
    open: bool,
}

impl HttpChannel {
    pub fn new(config: &HttpClientConfig, request: ConnectionRequest) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::Configuration(format!("invalid base url {}: {}", config.base_url, e)))?;
        let endpoint = base
            .join(ENTITIES_PATH)
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            request,
            session: None,
            open: true,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Token of the open transaction, if any
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    async fn post(&mut self, request: &EntityRequest) -> Result<Outcome> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(
                self.request.user.username(),
                Some(self.request.user.password()),
            )
            .header(CLIENT_ID_HEADER, self.request.client_id.to_string())
            .header(CLIENT_TYPE_HEADER, &self.request.client_type)
            .header(DOMAIN_HEADER, &self.request.domain)
            .json(&Envelope::new(request));
        if let Some(session) = &self.session {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("[Http] {} failed: {}", request.method(), e);
            Error::Transport(e.to_string())
        })?;
        let status = response.status();
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let outcome = match serde_json::from_slice::<Envelope<Outcome>>(&body) {
            Ok(envelope) => envelope.open()?,
            Err(_) if status == StatusCode::UNAUTHORIZED => {
                return Err(Error::Authentication(format!(
                    "{} rejected the credentials of {}",
                    self.endpoint, self.request.user
                )))
            }
            Err(e) => {
                return Err(Error::Transport(format!(
                    "unexpected response ({}): {}",
                    status, e
                )))
            }
        };
        debug!("[Http] {} -> {}", request.method(), status);

        self.track_session(request, session);
        Ok(outcome)
    }

    /// The server echoes the session header while the transaction stays
    /// pinned; a missing header means it was committed, rolled back or expired.
    fn track_session(&mut self, request: &EntityRequest, session: Option<String>) {
        if self.session.is_none() && *request != EntityRequest::BeginTransaction {
            return;
        }
        match (&self.session, &session) {
            (None, None) => warn!("[Http] Transaction started without a session token"),
            (Some(_), None) => debug!("[Http] Transaction session ended"),
            _ => {}
        }
        self.session = session;
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn call(&mut self, request: EntityRequest) -> Result<Outcome> {
        if !self.open {
            return Err(Error::Closed);
        }
        self.post(&request).await
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if self.session.is_some() {
            info!("[Http] Rolling back transaction left open on close");
            if let Err(e) = self.post(&EntityRequest::RollbackTransaction).await {
                warn!("[Http] Rollback on close failed: {}", e);
            }
            self.session = None;
        }
        self.open = false;
        Ok(())
    }
}

impl HttpEntityConnection {
    /// Create an HTTP session; credentials are checked by the first call
    pub fn connect(
        domain: Arc<Domain>,
        request: ConnectionRequest,
        config: &HttpClientConfig,
    ) -> Result<Self> {
        info!(
            "[Http] Connecting {} to {} as {}",
            request.client_type, config.base_url, request.user
        );
        let user = request.user.clone();
        let channel = HttpChannel::new(config, request)?;
        Ok(ProxyConnection::new(domain, user, channel))
    }
}
