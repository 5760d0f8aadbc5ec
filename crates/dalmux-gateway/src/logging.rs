//! Request correlation for HTTP logging

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{info, info_span, Span};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Short unique id for one request (6 hex characters)
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    format!("{:06x}", counter.wrapping_add(timestamp) & 0xFFFFFF)
}

/// What is known about one HTTP call while it is served.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    /// Entity operation, when the body names one
    pub operation: Option<String>,
    pub domain: Option<String>,
    /// The call carried a session token and runs on a pinned transaction
    pub pinned: bool,
    pub started_at: Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            operation: None,
            domain: None,
            pinned: false,
            started_at: Instant::now(),
        }
    }

    pub fn with_operation(mut self, operation: Option<String>) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_entity_target(mut self, domain: Option<&str>, pinned: bool) -> Self {
        self.domain = domain.map(str::to_string);
        self.pinned = pinned;
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn span(&self) -> Span {
        info_span!(
            "request",
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
        )
    }

    /// One line per call; health probes and statistics stay terse
    pub fn log_entry(&self) {
        let Some(operation) = &self.operation else {
            info!(trace_id = %self.trace_id, "→ {} {}", self.method, self.path);
            return;
        };
        info!(
            trace_id = %self.trace_id,
            "→ {} {} {} domain={}{}",
            self.method,
            self.path,
            operation,
            self.domain.as_deref().unwrap_or("-"),
            if self.pinned { " pinned" } else { "" }
        );
    }

    pub fn log_exit(&self, status: u16, outcome: Option<&str>) {
        match outcome {
            Some(outcome) => info!(
                trace_id = %self.trace_id,
                "← {} {} ({}ms)",
                status,
                outcome,
                self.elapsed_ms()
            ),
            None => info!(trace_id = %self.trace_id, "← {} ({}ms)", status, self.elapsed_ms()),
        }
    }
}
