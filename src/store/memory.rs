//! In-process queue store.
//!
//! A single mutex stands in for the row lock: claim, record, and reclaim
//! each run under it, so a claimed request is visible to exactly one caller.

use super::{QueueStore, StatusCounts, empty_counts};
use crate::engine::fetch::FetchOutcome;
use crate::engine::retry::Transition;
use crate::error::{Error, Result};
use crate::model::{NewRequest, Request, RequestId, Response, Status, validate_transition};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Default)]
struct Tables {
    requests: BTreeMap<RequestId, Request>,
    responses: Vec<Response>,
    next_request_id: i64,
    next_response_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total responses recorded across all requests.
    pub fn response_count(&self) -> usize {
        self.tables.lock().responses.len()
    }

    /// Force a request's `updated_at` back in time (lease tests).
    pub fn backdate(&self, id: RequestId, by: Duration) {
        let mut tables = self.tables.lock();
        if let Some(req) = tables.requests.get_mut(&id) {
            req.updated_at -= chrono::Duration::from_std(by).unwrap_or_default();
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, new: NewRequest) -> Result<Request> {
        let mut tables = self.tables.lock();
        tables.next_request_id += 1;
        let now = Utc::now();
        let req = Request {
            id: RequestId(tables.next_request_id),
            uri: new.uri,
            method: new.method,
            params: new.params,
            headers: new.headers,
            status: Status::Pending,
            retries: 0,
            created_at: now,
            updated_at: now,
        };
        tables.requests.insert(req.id, req.clone());
        Ok(req)
    }

    async fn claim_next(&self) -> Result<Option<Request>> {
        let mut tables = self.tables.lock();
        let Some(req) = tables
            .requests
            .values_mut()
            .find(|r| r.status == Status::Pending)
        else {
            return Ok(None);
        };
        req.status = Status::Processing;
        req.updated_at = Utc::now();
        Ok(Some(req.clone()))
    }

    async fn record_outcome(
        &self,
        id: RequestId,
        outcome: &FetchOutcome,
        transition: Transition,
    ) -> Result<Request> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        let req = tables
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        validate_transition(req.status, transition.status)?;

        let now = Utc::now();
        req.status = transition.status;
        req.retries = transition.retries;
        req.updated_at = now;
        let updated = req.clone();

        tables.next_response_id += 1;
        tables.responses.push(Response {
            id: tables.next_response_id,
            request_id: id,
            status_code: outcome.status_code(),
            body: outcome.body().map(str::to_string),
            error: outcome.error().map(str::to_string),
            created_at: now,
        });

        Ok(updated)
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(lease).unwrap_or_default();
        let mut tables = self.tables.lock();
        let mut reclaimed = 0;
        for req in tables.requests.values_mut() {
            if req.status == Status::Processing && req.updated_at < cutoff {
                req.status = Status::Pending;
                req.updated_at = Utc::now();
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn get_request(&self, id: RequestId) -> Result<Request> {
        self.tables
            .lock()
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("request {id}")))
    }

    async fn list_requests(&self, status: Option<Status>, limit: i64) -> Result<Vec<Request>> {
        let tables = self.tables.lock();
        Ok(tables
            .requests
            .values()
            .rev()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn responses_for(&self, id: RequestId) -> Result<Vec<Response>> {
        Ok(self
            .tables
            .lock()
            .responses
            .iter()
            .filter(|r| r.request_id == id)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let mut counts = empty_counts();
        for req in self.tables.lock().requests.values() {
            *counts.entry(req.status.to_string()).or_default() += 1;
        }
        Ok(counts)
    }
}
