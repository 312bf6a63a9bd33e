//! Structured spans for request handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{Level, Span, field, span};

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Span covering one inbound page request from receipt to reply.
pub fn rpc_request_span(origin: &str, method: &str) -> Span {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    span!(
        Level::INFO,
        "rpc.request",
        seq = seq,
        origin = origin,
        method = method,
        is_error = field::Empty,
        error_code = field::Empty,
        duration_ms = field::Empty,
    )
}

pub fn approval_span(kind: &str, origin: &str) -> Span {
    span!(
        Level::DEBUG,
        "approval.pending",
        kind = kind,
        origin = origin,
        approval_id = field::Empty,
    )
}

/// Records the outcome of a request onto its span.
pub struct RequestTimer {
    span: Span,
    start: Instant,
}

impl RequestTimer {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn finish(self, error_code: Option<i64>) -> f64 {
        let elapsed = self.elapsed_ms();
        self.span.record("duration_ms", elapsed as u64);
        self.span.record("is_error", error_code.is_some());
        if let Some(code) = error_code {
            self.span.record("error_code", code);
        }
        elapsed
    }
}
