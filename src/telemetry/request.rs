//! Request processing span helpers.
//!
//! Provides span creation and status-transition recording for requests
//! flowing through a worker.

use crate::model::Request;
use tracing::Span;

/// Start a span for one processing cycle of a claimed request.
///
/// `request.status` and `http.response.status_code` are declared empty and
/// filled in once the attempt's outcome is known.
pub fn start_request_span(request: &Request, worker: usize) -> Span {
    tracing::info_span!(
        "request.process",
        "request.id" = request.id.0,
        "request.retries" = request.retries,
        "request.status" = tracing::field::Empty,
        "http.request.method" = %request.method,
        "url.path" = %request.uri,
        "http.response.status_code" = tracing::field::Empty,
        "worker.id" = worker,
    )
}

/// Record a status transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates its
/// `request.status` field.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("request.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
