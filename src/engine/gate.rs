//! Concurrency gate: caps in-flight outbound calls process-wide.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting admission control shared by every worker of a pool.
///
/// Cloning is cheap and yields a handle to the same slots.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

/// A held slot. Dropping it releases the slot, on every exit path.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    /// A gate with `capacity` slots. Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until a slot is free, then hold it.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("concurrency gate unavailable: {e}")))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        metrics::fetch_in_flight().add(1, &[]);
        Ok(GatePermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[cfg(test)]
    fn close(&self) {
        self.semaphore.close();
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::fetch_in_flight().add(-1, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn acquire_waits_for_a_free_slot() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err(), "second acquire should wait");

        drop(held);
        let got = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(got.is_ok());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn closed_gate_returns_error() {
        let gate = ConcurrencyGate::new(1);
        gate.close();
        let err = gate.acquire().await.err().unwrap();
        assert!(err.to_string().contains("concurrency gate unavailable"));
        assert_eq!(gate.in_flight(), 0);
    }
}
