//! Worker pool: runs a fixed set of workers until every one sees an empty queue.

use super::fetch::FetchExecutor;
use super::gate::ConcurrencyGate;
use super::retry::RetryPolicy;
use super::worker::{Worker, WorkerReport};
use crate::config::ConcurrencyConfig;
use crate::error::Result;
use crate::store::QueueStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers to run.
    pub workers: usize,
    /// Capacity of the outbound concurrency gate.
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Pause after a store error before a worker claims again.
    pub store_retry_delay: Duration,
    /// If set, stranded `processing` rows older than this are requeued at start.
    pub lease: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::with_concurrency(crate::config::DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

impl PoolConfig {
    /// Worker count and gate capacity both set to `n`.
    pub fn with_concurrency(n: usize) -> Self {
        Self {
            workers: n,
            max_in_flight: n,
            retry: RetryPolicy::default(),
            store_retry_delay: Duration::from_millis(500),
            lease: None,
        }
    }
}

impl From<ConcurrencyConfig> for PoolConfig {
    fn from(c: ConcurrencyConfig) -> Self {
        Self {
            workers: c.workers,
            max_in_flight: c.max_concurrent_requests,
            lease: c.lease,
            ..Self::with_concurrency(c.max_concurrent_requests)
        }
    }
}

/// Aggregate of all worker reports for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub totals: WorkerReport,
    /// Requests returned to `pending` by the lease check at start.
    pub reclaimed: u64,
    /// Worker tasks that ended without a report (aborted, or panicked outside a cycle).
    pub worker_panics: usize,
}

/// Runs workers against a shared store, fetcher, and gate.
#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn QueueStore>,
    fetcher: Arc<dyn FetchExecutor>,
    gate: ConcurrencyGate,
    config: PoolConfig,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn QueueStore>,
        fetcher: Arc<dyn FetchExecutor>,
        config: PoolConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            gate: ConcurrencyGate::new(config.max_in_flight),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Ask workers to stop after their current cycle.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run until every worker has stopped.
    pub async fn run(&self) -> Result<PoolReport> {
        let mut report = PoolReport::default();

        if let Some(lease) = self.config.lease {
            report.reclaimed = self.store.reclaim_stale(lease).await?;
            if report.reclaimed > 0 {
                warn!(
                    count = report.reclaimed,
                    lease_secs = lease.as_secs(),
                    "requeued stranded requests"
                );
            }
        }

        info!(
            workers = self.config.workers,
            max_in_flight = self.gate.capacity(),
            "worker pool started"
        );

        let mut set = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                store: Arc::clone(&self.store),
                fetcher: Arc::clone(&self.fetcher),
                gate: self.gate.clone(),
                retry: self.config.retry,
                store_retry_delay: self.config.store_retry_delay,
                shutdown: Arc::clone(&self.shutdown),
            };
            set.spawn(worker.run());
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_report) => report.totals.merge(worker_report),
                Err(e) => {
                    report.worker_panics += 1;
                    error!(error = %e, "worker task ended abnormally");
                }
            }
        }

        info!(
            claimed = report.totals.claimed,
            completed = report.totals.completed,
            requeued = report.totals.requeued,
            failed = report.totals.failed,
            store_errors = report.totals.store_errors,
            panics = report.totals.panics,
            "worker pool drained"
        );

        Ok(report)
    }
}
