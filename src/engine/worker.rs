//! Worker: claim one request, call out through the gate, commit the outcome,
//! repeat until the queue is empty.

use super::fetch::{FetchExecutor, FetchOutcome};
use super::gate::ConcurrencyGate;
use super::retry::{RetryPolicy, Transition};
use crate::error::Result;
use crate::model::{Request, Status};
use crate::store::QueueStore;
use crate::telemetry::metrics;
use crate::telemetry::request::{record_state_transition, start_request_span};
use opentelemetry::KeyValue;
use futures::FutureExt as _;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Instrument, Span, debug, error, info, warn};

/// Per-worker tally, returned when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub claimed: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub store_errors: u64,
    /// Cycles that panicked. The request is left in `processing`.
    pub panics: u64,
}

impl WorkerReport {
    pub fn merge(&mut self, other: WorkerReport) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.requeued += other.requeued;
        self.failed += other.failed;
        self.store_errors += other.store_errors;
        self.panics += other.panics;
    }

    fn record(&mut self, transition: Transition) {
        match transition.status {
            Status::Completed => self.completed += 1,
            Status::Failed => self.failed += 1,
            _ => self.requeued += 1,
        }
    }
}

/// One sequential consumer of the queue.
pub struct Worker {
    pub(crate) id: usize,
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) fetcher: Arc<dyn FetchExecutor>,
    pub(crate) gate: ConcurrencyGate,
    pub(crate) retry: RetryPolicy,
    pub(crate) store_retry_delay: Duration,
    pub(crate) shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Loop until the queue is empty or shutdown is requested.
    ///
    /// Store errors and panics never end the loop; an empty queue always does.
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(worker = self.id, "shutdown requested, stopping");
                break;
            }

            let request = match self.store.claim_next().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!(worker = self.id, "no pending requests, stopping");
                    break;
                }
                Err(e) => {
                    report.store_errors += 1;
                    metrics::store_errors().add(1, &[KeyValue::new("phase", "claim")]);
                    error!(worker = self.id, error = %e, "claim failed, retrying");
                    tokio::time::sleep(self.store_retry_delay).await;
                    continue;
                }
            };

            report.claimed += 1;
            let id = request.id;
            let span = start_request_span(&request, self.id);

            let cycle = AssertUnwindSafe(self.process(request, &span).instrument(span.clone()))
                .catch_unwind()
                .await;

            match cycle {
                Ok(Ok(transition)) => report.record(transition),
                Ok(Err(e)) => {
                    report.store_errors += 1;
                    metrics::store_errors().add(1, &[KeyValue::new("phase", "record")]);
                    error!(
                        worker = self.id,
                        request_id = %id,
                        error = %e,
                        "failed to record outcome, request left in processing"
                    );
                }
                Err(panic) => {
                    report.panics += 1;
                    error!(
                        worker = self.id,
                        request_id = %id,
                        panic = panic_message(&*panic),
                        "request processing panicked, request left in processing"
                    );
                }
            }
        }

        report
    }

    /// Execute one claimed request and commit its outcome.
    async fn process(&self, request: Request, span: &Span) -> Result<Transition> {
        record_state_transition(span, "pending", "processing");
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("from", "pending"),
                KeyValue::new("to", "processing"),
            ],
        );

        let outcome = match self.gate.acquire().await {
            Ok(_permit) => self.fetch(&request, span).await,
            Err(e) => FetchOutcome::Failed(e.to_string()),
        };

        let transition = self.retry.next(request.retries, &outcome);
        match (outcome.error(), transition.status) {
            (None, _) => info!(request_id = %request.id, "request completed"),
            (Some(e), Status::Failed) => error!(
                request_id = %request.id,
                retries = transition.retries,
                error = e,
                "request failed, retry budget exhausted"
            ),
            (Some(e), _) => warn!(
                request_id = %request.id,
                retries = transition.retries,
                error = e,
                "attempt failed, requeued"
            ),
        }

        self.store
            .record_outcome(request.id, &outcome, transition)
            .await?;

        record_state_transition(span, "processing", transition.status.as_str());
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("from", "processing"),
                KeyValue::new("to", transition.status.as_str()),
            ],
        );

        Ok(transition)
    }

    /// Make the outbound call (caller holds a gate slot) and record its metrics.
    async fn fetch(&self, request: &Request, span: &Span) -> FetchOutcome {
        debug!(in_flight = self.gate.in_flight(), "gate slot acquired");
        let started = Instant::now();
        let outcome = self.fetcher.execute(request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut attrs = vec![
            KeyValue::new("outcome", outcome.label()),
            KeyValue::new(HTTP_REQUEST_METHOD, request.method.to_uppercase()),
        ];
        if let Some(code) = outcome.status_code() {
            span.record("http.response.status_code", code);
            attrs.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(code)));
        }
        metrics::fetch_outcomes().add(1, &attrs);
        metrics::fetch_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("outcome", outcome.label())]);
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
