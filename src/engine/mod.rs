//! Queue-consumption engine: concurrency gate, fetch executor, retry
//! state machine, workers, and the pool that runs them.

pub mod fetch;
pub mod gate;
pub mod pool;
pub mod retry;
pub mod worker;

pub use fetch::{FetchExecutor, FetchOutcome, HttpFetcher};
pub use gate::{ConcurrencyGate, GatePermit};
pub use pool::{PoolConfig, PoolReport, WorkerPool};
pub use retry::{RetryPolicy, Transition};
pub use worker::{Worker, WorkerReport};
