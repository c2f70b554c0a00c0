//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup, fails fast if required values are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub service: ServiceConfig,
    pub concurrency: ConcurrencyConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// The destination service every queued request is sent to.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub url: String,
    pub login: String,
    pub password: SecretString,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// Capacity of the outbound concurrency gate.
    pub max_concurrent_requests: usize,
    /// Number of workers draining the queue.
    pub workers: usize,
    /// Age after which a `processing` request is considered stranded.
    pub lease: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_concurrent_requests = parse_var(
            &lookup,
            "MAX_CONCURRENT_REQUESTS",
            DEFAULT_MAX_CONCURRENT_REQUESTS,
        )?;
        let lease_secs: Option<u64> = lookup("QUEUE_LEASE_SECS")
            .map(|v| parse_value("QUEUE_LEASE_SECS", &v))
            .transpose()?;

        Config {
            database_url: SecretString::from(required_var(&lookup, "DATABASE_URL")?),
            service: ServiceConfig {
                url: required_var(&lookup, "SERVICE_URL")?,
                login: required_var(&lookup, "SERVICE_LOGIN")?,
                password: SecretString::from(required_var(&lookup, "SERVICE_PASSWORD")?),
                timeout: Duration::from_secs(parse_var(
                    &lookup,
                    "SERVICE_TIMEOUT_SECS",
                    DEFAULT_TIMEOUT_SECS,
                )?),
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_requests,
                workers: parse_var(&lookup, "WORKERS", max_concurrent_requests)?,
                lease: lease_secs.map(Duration::from_secs),
            },
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
        .validate()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config file: {e}")))?;

        let max_concurrent_requests = file
            .concurrency
            .max_concurrent_requests
            .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS);

        Config {
            database_url: SecretString::from(file.database.into_url()?),
            service: ServiceConfig {
                url: file.service.url,
                login: file.service.login,
                password: SecretString::from(file.service.password),
                timeout: Duration::from_secs(file.service.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_requests,
                workers: file.concurrency.workers.unwrap_or(max_concurrent_requests),
                lease: file.concurrency.lease_secs.map(Duration::from_secs),
            },
            otel_endpoint: file.logging.otel_endpoint,
            log_level: file.logging.level.unwrap_or_else(|| "info".to_string()),
        }
        .validate()
    }

    fn validate(self) -> Result<Self> {
        if self.service.url.trim().is_empty() {
            return Err(Error::Config("service url must not be empty".into()));
        }
        if self.service.timeout.is_zero() {
            return Err(Error::Config("service timeout must be positive".into()));
        }
        if self.concurrency.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "max concurrent requests must be at least 1".into(),
            ));
        }
        if self.concurrency.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        Ok(self)
    }
}

fn required_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(v) => parse_value(name, &v),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} has invalid value {value:?}")))
}

// ---------------------------------------------------------------------------
// TOML file layout
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FileConfig {
    database: DatabaseSection,
    service: ServiceSection,
    #[serde(default)]
    concurrency: ConcurrencySection,
    #[serde(default)]
    logging: LoggingSection,
}

/// Either a full `url`, or the parts to build a Postgres one.
#[derive(Debug, Deserialize)]
struct DatabaseSection {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl DatabaseSection {
    fn into_url(self) -> Result<String> {
        if let Some(url) = self.url {
            return Ok(url);
        }
        let missing = |field: &str| Error::Config(format!("[database] needs `url` or `{field}`"));
        let host = self.host.ok_or_else(|| missing("host"))?;
        let database = self.database.ok_or_else(|| missing("database"))?;
        let port = self.port.unwrap_or(5432);
        let auth = match (self.username, self.password) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (Some(user), None) => format!("{user}@"),
            (None, _) => String::new(),
        };
        Ok(format!("postgres://{auth}{host}:{port}/{database}"))
    }
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    url: String,
    login: String,
    password: String,
    /// Seconds.
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConcurrencySection {
    max_concurrent_requests: Option<usize>,
    workers: Option<usize>,
    lease_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    otel_endpoint: Option<String>,
}
