//! Metric instrument factories for fetchq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fetchq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

/// Returns the shared meter for fetchq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fetchq")
}

/// Counter: requests submitted to the queue.
/// Labels: `method`.
pub fn requests_submitted() -> Counter<u64> {
    meter()
        .u64_counter("fetchq.requests.submitted")
        .with_description("Number of requests submitted")
        .build()
}

/// Counter: request status transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("fetchq.requests.state_transitions")
        .with_description("Number of request status transitions")
        .build()
}

/// Counter: queue-level operations (claim, claim_empty, reclaim).
/// Labels: `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("fetchq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: classified fetch outcomes.
/// Labels: `outcome` ("success" | "timeout" | "error"), `http.request.method`,
/// `http.response.status_code` on success.
pub fn fetch_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("fetchq.fetch.outcomes")
        .with_description("Outbound call outcomes")
        .build()
}

/// Histogram: outbound call duration in milliseconds.
/// Labels: `outcome`.
pub fn fetch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fetchq.fetch.duration_ms")
        .with_description("Outbound call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Up/down counter: outbound calls currently holding a gate slot.
pub fn fetch_in_flight() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("fetchq.fetch.in_flight")
        .with_description("Outbound calls in flight")
        .build()
}

/// Counter: store errors seen by workers.
/// Labels: `phase` ("claim" | "record").
pub fn store_errors() -> Counter<u64> {
    meter()
        .u64_counter("fetchq.store.errors")
        .with_description("Store errors observed by workers")
        .build()
}
