//! Queued request types.

use super::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered key/value pairs (query params or headers), as stored.
pub type Pairs = Map<String, Value>;

/// A unit of work: one outbound call to make.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,

    /// Path relative to the destination service base URL.
    pub uri: String,

    /// HTTP method, as submitted.
    pub method: String,

    /// Query parameters in submission order.
    pub params: Option<Pairs>,

    /// Headers in submission order.
    pub headers: Option<Pairs>,

    pub status: Status,

    /// Number of failed execution attempts so far.
    pub retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Query params as string pairs. Non-string JSON values use their JSON text.
    pub fn param_pairs(&self) -> Vec<(String, String)> {
        string_pairs(self.params.as_ref())
    }

    /// Headers as string pairs. Non-string JSON values use their JSON text.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        string_pairs(self.headers.as_ref())
    }
}

fn string_pairs(pairs: Option<&Pairs>) -> Vec<(String, String)> {
    pairs
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Newtype for request IDs (assigned by the store, monotonically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(RequestId)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting new requests to the queue.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub(crate) uri: String,
    pub(crate) method: String,
    pub(crate) params: Option<Pairs>,
    pub(crate) headers: Option<Pairs>,
}

impl NewRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: method.into(),
            params: None,
            headers: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Map::new)
            .insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_insertion_order() {
        let new = NewRequest::new("GET", "/wiki/API")
            .param("z", "1")
            .param("a", "2")
            .header("Accept", "application/json");

        let keys: Vec<_> = new.params.as_ref().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(new.headers.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn non_string_values_render_as_json_text() {
        let mut params = Map::new();
        params.insert("page".into(), Value::from(2));
        params.insert("q".into(), Value::from("rust"));
        let req = Request {
            id: RequestId(1),
            uri: "/search".into(),
            method: "GET".into(),
            params: Some(params),
            headers: None,
            status: Status::Pending,
            retries: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(
            req.param_pairs(),
            vec![("page".into(), "2".into()), ("q".into(), "rust".into())]
        );
        assert!(req.header_pairs().is_empty());
    }
}
