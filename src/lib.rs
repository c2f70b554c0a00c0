//! # fetchq
//!
//! Postgres-backed queue of outbound HTTP fetch requests.
//!
//! Requests are stored durably, claimed one at a time with a skip-locked
//! select, executed through a bounded concurrency gate, and their outcomes
//! recorded with a fixed retry budget. Provides the queue store (sqlx),
//! the worker engine (tokio + reqwest), and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
