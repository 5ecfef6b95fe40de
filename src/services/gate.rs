//! Process-wide admission control for analysis work.
//!
//! The gate bounds how many requests may be in the active analysis phase at
//! once. Capacity is fixed when the gate is constructed; resizing it means
//! restarting the process.
//!
//! ```ignore
//! let gate = Arc::new(ConcurrencyGate::new(4));
//! let _permit = gate.acquire().await?;
//! // analysis runs here; the permit is released when `_permit` is dropped
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl GateCounters {
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

/// Counting admission gate with a fixed capacity.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<GateCounters>,
}

impl ConcurrencyGate {
    /// Creates a gate admitting at most `capacity` holders. A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(GateCounters::default()),
        }
    }

    /// Waits until a permit is free.
    ///
    /// The permit is released exactly once, when it is dropped. That includes
    /// error returns and cancellation of the task holding it.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        Ok(self.admit(permit))
    }

    /// Takes a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let current = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        self.counters.update_peak(current);
        metrics::gauge!("analysis_gate_in_flight").set(current as f64);

        GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of gate accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct GateStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub acquired: u64,
    pub released: u64,
}

/// Scoped gate permit; dropping it releases capacity.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let current = self.counters.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("analysis_gate_in_flight").set(current as f64);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Concurrency gate is closed")]
    Closed,
}
