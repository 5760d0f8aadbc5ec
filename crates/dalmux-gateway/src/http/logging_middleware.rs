//! HTTP request/response logging
//!
//! One entry and one exit line per request, correlated by a trace id. The
//! authorization header is never logged and entity payloads are only
//! summarized.

use axum::{body::Body, extract::Request, http::StatusCode, middleware::Next, response::Response};
use http_body_util::BodyExt;
use dalmux_core::protocol::{DOMAIN_HEADER, SESSION_HEADER};
use tracing::{debug, warn, Instrument};

use crate::logging::TraceContext;

/// Headers that are logged with their value redacted
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Headers worth logging at debug level
const LOGGED_HEADERS: &[&str] = &[
    "content-type",
    "user-agent",
    "authorization",
    "x-dalmux-client-id",
    "x-dalmux-client-type",
    "x-dalmux-domain",
    "x-dalmux-session",
];

pub fn redact_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| LOGGED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.as_str()) {
                format!("{}=[REDACTED]", name)
            } else {
                format!("{}={:?}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entity operation named by an enveloped request body
pub fn extract_operation(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    json.get("payload")?
        .get("method")?
        .as_str()
        .map(String::from)
}

/// Outcome summary of an enveloped response body
pub fn summarize_outcome(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let payload = json.get("payload")?;
    if let Some(error) = payload.get("err") {
        let kind = error.get("error").and_then(|e| e.as_str()).unwrap_or("unknown");
        return Some(format!("error: {}", kind));
    }
    let ok = payload.get("ok")?;
    let result = ok.get("result").and_then(|r| r.as_str()).unwrap_or("?");
    match ok.get("value").and_then(|v| v.as_array()) {
        Some(items) => Some(format!("{}: {}", result, items.len())),
        None => Some(result.to_string()),
    }
}

pub async fn http_logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let ctx = TraceContext::new(&method, &path);
    let span = ctx.span();

    async move {
        let (parts, body) = request.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read request body: {}", e);
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        let ctx = ctx
            .with_operation(extract_operation(&body_bytes))
            .with_entity_target(
                headers.get(DOMAIN_HEADER).and_then(|v| v.to_str().ok()),
                headers.contains_key(SESSION_HEADER),
            );
        ctx.log_entry();
        debug!(
            trace_id = %ctx.trace_id,
            headers = %redact_headers(&headers),
            "Request headers"
        );

        let request = Request::from_parts(parts, Body::from(body_bytes));
        let response = next.run(request).await;

        let (parts, body) = response.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let outcome = summarize_outcome(&body_bytes);
        ctx.log_exit(parts.status.as_u16(), outcome.as_deref());

        Ok(Response::from_parts(parts, Body::from(body_bytes)))
    }
    .instrument(span)
    .await
}
