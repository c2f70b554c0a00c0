//! Fetch executor: one bounded-time outbound call, classified as a value.
//!
//! Every failure mode (timeout, connect error, bad method or header,
//! body read failure) is folded into [`FetchOutcome`]. Nothing crosses
//! this boundary as an `Err`.

use crate::config::ServiceConfig;
use crate::config::secrets::{ExposeSecret, SecretString};
use crate::error::{Error, Result};
use crate::model::Request;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;

/// Error text recorded when the time budget is exceeded.
pub const TIMEOUT_ERROR: &str = "Timeout";

/// Three-way result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination answered. Any status code counts, including 4xx/5xx.
    Success { status_code: u16, body: String },
    /// The time budget ran out.
    Timeout,
    /// Any other transport-level failure.
    Failed(String),
}

impl FetchOutcome {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchOutcome::Success { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            FetchOutcome::Success { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Error description, absent on success.
    pub fn error(&self) -> Option<&str> {
        match self {
            FetchOutcome::Success { .. } => None,
            FetchOutcome::Timeout => Some(TIMEOUT_ERROR),
            FetchOutcome::Failed(e) => Some(e),
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::Timeout => "timeout",
            FetchOutcome::Failed(_) => "error",
        }
    }
}

/// Performs the outbound call for a claimed request.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn execute(&self, request: &Request) -> FetchOutcome;
}

/// [`FetchExecutor`] backed by reqwest, with basic auth against one
/// destination service.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    login: String,
    password: SecretString,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(service: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(service.timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: service.url.clone(),
            login: service.login.clone(),
            password: service.password.clone(),
            timeout: service.timeout,
        })
    }

    /// Full destination URL: base and uri joined by exactly one `/`.
    pub fn url_for(&self, uri: &str) -> String {
        join_url(&self.base_url, uri)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, request: &Request) -> FetchOutcome {
        let Ok(method) = Method::from_bytes(request.method.to_uppercase().as_bytes()) else {
            return FetchOutcome::Failed(format!("invalid HTTP method: {}", request.method));
        };

        let mut headers = HeaderMap::new();
        for (name, value) in request.header_pairs() {
            let header_name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(n) => n,
                Err(e) => return FetchOutcome::Failed(format!("invalid header name {name:?}: {e}")),
            };
            let header_value = match HeaderValue::from_str(&value) {
                Ok(v) => v,
                Err(e) => {
                    return FetchOutcome::Failed(format!("invalid header value for {name}: {e}"));
                }
            };
            headers.append(header_name, header_value);
        }

        let url = self.url_for(&request.uri);
        debug!(%url, %method, "sending request");

        let response = match self
            .client
            .request(method, &url)
            .query(&request.param_pairs())
            .headers(headers)
            .basic_auth(&self.login, Some(self.password.expose_secret()))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return classify(e),
        };

        let status_code = response.status().as_u16();
        match response.text().await {
            Ok(body) => FetchOutcome::Success { status_code, body },
            Err(e) => classify(e),
        }
    }
}

#[async_trait]
impl FetchExecutor for HttpFetcher {
    async fn execute(&self, request: &Request) -> FetchOutcome {
        // The client timeout covers each phase; this bounds send + body read together.
        tokio::time::timeout(self.timeout, self.send(request))
            .await
            .unwrap_or(FetchOutcome::Timeout)
    }
}

fn classify(e: reqwest::Error) -> FetchOutcome {
    if e.is_timeout() {
        FetchOutcome::Timeout
    } else {
        FetchOutcome::Failed(e.to_string())
    }
}

fn join_url(base: &str, uri: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        uri.trim_start_matches('/')
    )
}
