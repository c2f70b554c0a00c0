//! Durable store seam for the request queue.
//!
//! [`QueueStore`] is what workers see. [`crate::db::Db`] implements it on
//! Postgres with a skip-locked claim; [`MemoryStore`] implements the same
//! visibility-once contract in process, for tests and single-process use.

pub mod memory;

pub use memory::MemoryStore;

use crate::engine::fetch::FetchOutcome;
use crate::engine::retry::Transition;
use crate::error::Result;
use crate::model::{NewRequest, Request, RequestId, Response, Status};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Request counts keyed by status. Every status is present.
pub type StatusCounts = BTreeMap<String, i64>;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new `pending` request with zero retries.
    async fn enqueue(&self, new: NewRequest) -> Result<Request>;

    /// Atomically move one `pending` request (lowest id first) to
    /// `processing` and return it. `None` when nothing is pending.
    ///
    /// Concurrent callers never receive the same request.
    async fn claim_next(&self) -> Result<Option<Request>>;

    /// Append the attempt's response and apply `transition`, together.
    ///
    /// Fails with `InvalidTransition` if the request is not `processing`.
    async fn record_outcome(
        &self,
        id: RequestId,
        outcome: &FetchOutcome,
        transition: Transition,
    ) -> Result<Request>;

    /// Return requests stuck in `processing` longer than `lease` to
    /// `pending`. Returns how many were reclaimed.
    async fn reclaim_stale(&self, lease: Duration) -> Result<u64>;

    async fn get_request(&self, id: RequestId) -> Result<Request>;

    /// Newest first, optionally filtered by status.
    async fn list_requests(&self, status: Option<Status>, limit: i64) -> Result<Vec<Request>>;

    /// All responses for a request, oldest first.
    async fn responses_for(&self, id: RequestId) -> Result<Vec<Response>>;

    async fn count_by_status(&self) -> Result<StatusCounts>;
}

pub(crate) fn empty_counts() -> StatusCounts {
    Status::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect()
}
