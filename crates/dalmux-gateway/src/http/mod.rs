//! HTTP entity server
//!
//! `POST /entities` takes one enveloped [`EntityRequest`] per call and
//! answers with an enveloped [`Outcome`]. Every request carries Basic
//! credentials and the client headers. A successful `begin_transaction` pins
//! its connection under a session token; the token travels in the session
//! header both ways until the transaction ends.

mod affinity;
pub mod logging_middleware;

pub use affinity::{Affinity, PinnedTransaction, Transactions};

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use dalmux_core::codec::Envelope;
use dalmux_core::protocol::{
    EntityRequest, EntityResponse, Outcome, CLIENT_ID_HEADER, CLIENT_TYPE_HEADER, DOMAIN_HEADER,
    SESSION_HEADER,
};
use dalmux_core::{ConnectionRequest, EntityConnection, Error, Result, User};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::HttpConfig;
use crate::dispatch::dispatch;
use crate::server::{EntityServer, ServerStatistics};

/// Client type assumed when the header is missing
pub const DEFAULT_CLIENT_TYPE: &str = "http";

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<EntityServer>,
    pub transactions: Arc<Transactions>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
    pub transactions: usize,
}

pub struct HttpServer {
    config: HttpConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(server: Arc<EntityServer>, config: HttpConfig) -> Self {
        let transactions = Arc::new(Transactions::new(config.transaction_timeout()));
        Self {
            config,
            state: AppState {
                server,
                transactions,
            },
        }
    }

    pub fn transactions(&self) -> &Arc<Transactions> {
        &self.state.transactions
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .route("/statistics", get(statistics))
            .route("/entities", post(entities))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(
                logging_middleware::http_logging_middleware,
            ));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }
        router
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.addr()?;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {}", addr))
    }

    /// Serve until `token` is cancelled, then roll back pinned transactions
    pub async fn serve(self, listener: TcpListener, token: CancellationToken) -> anyhow::Result<()> {
        info!("[Http] Listening on {}", listener.local_addr()?);
        let sweeper = self.state.transactions.spawn_sweeper(token.clone());
        let router = self.router();

        let shutdown = token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server failed")?;

        sweeper.abort();
        self.state.transactions.release_all().await;
        info!("[Http] Listener stopped");
        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("[Http] Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.server.session_count(),
        transactions: state.transactions.len(),
    })
}

async fn statistics(State(state): State<AppState>) -> Json<ServerStatistics> {
    Json(state.server.statistics())
}

async fn entities(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let (result, session) = match handle(&state, &headers, &body).await {
        Ok(call) => call,
        Err(e) => (Err(e), None),
    };
    let (status, outcome) = match result {
        Ok(response) => (StatusCode::OK, Outcome::Ok(response)),
        Err(e) => {
            debug!("[Http] Request failed: {}", e);
            (status_for(&e), Outcome::from_result(Err(e)))
        }
    };

    let mut response = (status, Json(Envelope::new(outcome))).into_response();
    if let Some(token) = session {
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            Err(e) => warn!("[Http] Invalid session token {}: {}", token, e),
        }
    }
    response
}

/// Run one call. The session token is returned for as long as the call's
/// transaction stays pinned, whether or not the call itself succeeded.
async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(Result<EntityResponse>, Option<String>)> {
    let request = connection_request(headers)?;
    let call = serde_json::from_slice::<Envelope<EntityRequest>>(body)?.open()?;
    let (client, domain) = state.server.authenticate(request, None).await?;

    match state.transactions.resolve(header(headers, SESSION_HEADER), &client)? {
        Affinity::Pinned(pinned) => {
            let disconnect = call == EntityRequest::Disconnect;
            let mut connection = pinned.connection().lock().await;
            let result = dispatch(&mut *connection, call).await;
            let open = connection.is_transaction_open().await.unwrap_or(false);
            drop(connection);

            if disconnect || !open {
                state.transactions.release(pinned.token()).await;
                return Ok((result, None));
            }
            Ok((result, Some(pinned.token().to_string())))
        }
        Affinity::Stateless => {
            let mut connection = state.server.open_connection(&client, domain).await?;
            let begin = call == EntityRequest::BeginTransaction;
            let result = dispatch(&mut connection, call).await;

            if begin && result.is_ok() {
                let token = state.transactions.pin(&client, connection);
                return Ok((result, Some(token)));
            }
            if let Err(e) = connection.close().await {
                warn!("[Http] Closing request connection failed: {}", e);
            }
            Ok((result, None))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Credentials from the `Authorization: Basic` header
pub fn basic_auth(headers: &HeaderMap) -> Result<User> {
    let value = header(headers, "authorization")
        .ok_or_else(|| Error::Authentication("missing authorization header".to_string()))?;
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| Error::Authentication("only Basic authorization is supported".to_string()))?;
    let decoded = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::Authentication("malformed Basic credentials".to_string()))?,
    );
    let text = std::str::from_utf8(&decoded)
        .map_err(|_| Error::Authentication("malformed Basic credentials".to_string()))?;
    User::parse(text).map_err(|_| Error::Authentication("malformed Basic credentials".to_string()))
}

/// The connection request described by the request headers
pub fn connection_request(headers: &HeaderMap) -> Result<ConnectionRequest> {
    let user = basic_auth(headers)?;
    let domain = header(headers, DOMAIN_HEADER)
        .ok_or_else(|| Error::Configuration(format!("missing {} header", DOMAIN_HEADER)))?;
    let client_type = header(headers, CLIENT_TYPE_HEADER).unwrap_or(DEFAULT_CLIENT_TYPE);

    let mut request = ConnectionRequest::new(user, client_type, domain);
    if let Some(client_id) = header(headers, CLIENT_ID_HEADER) {
        let client_id = Uuid::parse_str(client_id)
            .map_err(|e| Error::Configuration(format!("invalid client id {}: {}", client_id, e)))?;
        request = request.with_client_id(client_id);
    }
    Ok(request)
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Authentication(_) => StatusCode::UNAUTHORIZED,
        Error::NotFound => StatusCode::NOT_FOUND,
        Error::RowModified { .. } | Error::Transaction(_) => StatusCode::CONFLICT,
        Error::Validation(_)
        | Error::Condition(_)
        | Error::Configuration(_)
        | Error::Serialization(_)
        | Error::NothingToUpdate(_)
        | Error::MultipleResults(_)
        | Error::UnknownOperation(_)
        | Error::Unsupported(_) => StatusCode::BAD_REQUEST,
        Error::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Transport(_) | Error::Closed => StatusCode::BAD_GATEWAY,
        Error::Database(_) | Error::RowCountMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
