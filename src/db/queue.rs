//! Postgres queue store: enqueue, skip-locked claim, outcome commit.

use crate::engine::fetch::FetchOutcome;
use crate::engine::retry::Transition;
use crate::error::{Error, Result};
use crate::model::request::Pairs;
use crate::model::{NewRequest, Request, RequestId, Response, Status, validate_transition};
use crate::store::{QueueStore, StatusCounts, empty_counts};
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::time::Duration;
use tracing::debug;

const REQUEST_COLUMNS: &str =
    "id, uri, method, params, headers, status, retries, created_at, updated_at";

#[async_trait]
impl QueueStore for super::Db {
    async fn enqueue(&self, new: NewRequest) -> Result<Request> {
        let now = Utc::now();
        let row: RequestRow = sqlx::query_as(&format!(
            "INSERT INTO queue_requests (uri, method, params, headers, status, retries, created_at, updated_at)
             VALUES ($1, $2, $3::json, $4::json, 'pending', 0, $5, $5)
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(&new.uri)
        .bind(&new.method)
        .bind(json_text(new.params.as_ref())?)
        .bind(json_text(new.headers.as_ref())?)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        metrics::requests_submitted().add(1, &[KeyValue::new("method", new.method.clone())]);

        row.try_into_request()
    }

    async fn claim_next(&self) -> Result<Option<Request>> {
        let mut tx = self.pool().begin().await?;

        // Rows locked by another in-flight claim are skipped, not waited on.
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "UPDATE queue_requests
             SET status = 'processing', updated_at = now()
             WHERE id = (
                 SELECT id FROM queue_requests
                 WHERE status = 'pending'
                 ORDER BY id
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {REQUEST_COLUMNS}"
        ))
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::queue_operations().add(
            1,
            &[KeyValue::new(
                "operation",
                if row.is_some() { "claim" } else { "claim_empty" },
            )],
        );

        row.map(RequestRow::try_into_request).transpose()
    }

    async fn record_outcome(
        &self,
        id: RequestId,
        outcome: &FetchOutcome,
        transition: Transition,
    ) -> Result<Request> {
        validate_transition(Status::Processing, transition.status)?;

        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "UPDATE queue_requests SET status = $1, retries = $2, updated_at = $3
             WHERE id = $4 AND status = 'processing'
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(transition.status.as_str())
        .bind(transition.retries as i32)
        .bind(now)
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Dropping `tx` rolls back; report what the row actually holds.
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM queue_requests WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                Some((from,)) => Error::InvalidTransition {
                    from,
                    to: transition.status.to_string(),
                },
                None => Error::NotFound(format!("request {id}")),
            });
        };

        sqlx::query(
            "INSERT INTO queue_responses (request_id, status_code, body, error, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(outcome.status_code().map(i32::from))
        .bind(outcome.body())
        .bind(outcome.error())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        row.try_into_request()
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(lease)
                .map_err(|e| Error::Config(format!("lease out of range: {e}")))?;

        let reclaimed = sqlx::query(
            "UPDATE queue_requests SET status = 'pending', updated_at = now()
             WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?
        .rows_affected();

        if reclaimed > 0 {
            debug!(count = reclaimed, "reclaimed stale requests");
            metrics::queue_operations()
                .add(reclaimed, &[KeyValue::new("operation", "reclaim")]);
        }

        Ok(reclaimed)
    }

    async fn get_request(&self, id: RequestId) -> Result<Request> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM queue_requests WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("request {id}")))?
            .try_into_request()
    }

    async fn list_requests(&self, status: Option<Status>, limit: i64) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM queue_requests
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY id DESC
             LIMIT $2"
        ))
        .bind(status.map(Status::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(RequestRow::try_into_request).collect()
    }

    async fn responses_for(&self, id: RequestId) -> Result<Vec<Response>> {
        let rows: Vec<ResponseRow> = sqlx::query_as(
            "SELECT id, request_id, status_code, body, error, created_at
             FROM queue_responses WHERE request_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(ResponseRow::into_response).collect())
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue_requests GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut counts = empty_counts();
        counts.extend(rows);
        Ok(counts)
    }
}

/// Serialize params/headers to JSON text; the insert casts it to `json`
/// so key order survives.
fn json_text(pairs: Option<&Pairs>) -> Result<Option<String>> {
    pairs
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Other(format!("serialize request pairs: {e}")))
}

fn into_pairs(value: Option<serde_json::Value>, column: &str) -> Result<Option<Pairs>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(Error::Other(format!(
            "{column} must be a JSON object, got {other}"
        ))),
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    uri: String,
    method: String,
    params: Option<serde_json::Value>,
    headers: Option<serde_json::Value>,
    status: String,
    retries: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn try_into_request(self) -> Result<Request> {
        Ok(Request {
            id: RequestId(self.id),
            uri: self.uri,
            method: self.method,
            params: into_pairs(self.params, "params")?,
            headers: into_pairs(self.headers, "headers")?,
            status: self.status.parse()?,
            retries: self.retries.max(0) as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResponseRow {
    id: i64,
    request_id: i64,
    status_code: Option<i32>,
    body: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl ResponseRow {
    fn into_response(self) -> Response {
        Response {
            id: self.id,
            request_id: RequestId(self.request_id),
            status_code: self.status_code.and_then(|c| u16::try_from(c).ok()),
            body: self.body,
            error: self.error,
            created_at: self.created_at,
        }
    }
}
