//! Response records: one per execution attempt, append-only.

use super::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single execution attempt, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    /// The request this attempt belongs to. Many responses may share one.
    pub request_id: RequestId,
    /// Absent when the attempt produced no HTTP response.
    pub status_code: Option<u16>,
    pub body: Option<String>,
    /// Absent on success.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
