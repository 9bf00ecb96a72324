//! Shared solver counters
//!
//! Iteration and failure counts live in an explicit context owned by the
//! search and handed by reference to every scheduler invocation — never in
//! process-wide statics. Counters are atomic so the context can be read
//! through shared references.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Monotonic counters shared by all scheduler invocations of one search
#[derive(Debug, Default)]
pub struct SolverContext {
    scheduling_iterations: AtomicUsize,
    scheduling_failures: AtomicUsize,
    scheduling_nanos: AtomicU64,
}

impl SolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scheduling_iteration(&self) {
        self.scheduling_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduling_failure(&self) {
        self.scheduling_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_scheduling_time(&self, elapsed: Duration) {
        self.scheduling_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// MILP iterations across every scheduler run of this search
    pub fn scheduling_iterations(&self) -> usize {
        self.scheduling_iterations.load(Ordering::Relaxed)
    }

    /// Scheduling attempts that ended in failure
    pub fn scheduling_failures(&self) -> usize {
        self.scheduling_failures.load(Ordering::Relaxed)
    }

    /// Wall-clock time spent inside schedulers (motion planning included)
    pub fn scheduling_time(&self) -> Duration {
        Duration::from_nanos(self.scheduling_nanos.load(Ordering::Relaxed))
    }
}
