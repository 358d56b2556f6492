//! Memo cache statistics and metrics tracking
//!
//! Counters distinguish the ways a lookup can be served: from a completed
//! value, by joining a computation already in flight, or by running the
//! computation itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for memo cache monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Current number of entries (completed or in flight)
    pub size: usize,

    /// Lookups answered from an already completed value
    pub hits: u64,

    /// Lookups that joined a computation started by another caller
    pub coalesced: u64,

    /// Computations started (one per installed entry)
    pub computations: u64,

    /// Computations that returned an error
    pub failures: u64,

    /// Computations whose caller unwound or was cancelled before settling
    pub abandoned: u64,

    /// Waits that gave up before the computation settled
    pub timeouts: u64,
}

impl MemoStats {
    /// Total number of lookups (hits + coalesced + computations)
    pub const fn total_requests(&self) -> u64 {
        self.hits + self.coalesced + self.computations
    }

    /// Fraction of lookups that did not run the computation themselves
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / total as f64
        }
    }

    /// Number of computations that ended with a cached value
    pub const fn successes(&self) -> u64 {
        self.computations.saturating_sub(self.failures + self.abandoned)
    }
}

/// Thread-safe metrics collector for memo cache operations
///
/// Uses atomic counters so recording never takes a lock. A disabled
/// collector ignores every record call.
#[derive(Debug)]
pub(crate) struct MetricsCollector {
    enabled: bool,
    hits: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    abandoned: AtomicU64,
    timeouts: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub(crate) const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_hit(&self) {
        self.bump(&self.hits);
    }

    pub(crate) fn record_coalesced(&self) {
        self.bump(&self.coalesced);
    }

    pub(crate) fn record_computation(&self) {
        self.bump(&self.computations);
    }

    pub(crate) fn record_failure(&self) {
        self.bump(&self.failures);
    }

    pub(crate) fn record_abandoned(&self) {
        self.bump(&self.abandoned);
    }

    pub(crate) fn record_timeout(&self) {
        self.bump(&self.timeouts);
    }

    /// Get current statistics snapshot
    pub(crate) fn snapshot(&self, size: usize) -> MemoStats {
        MemoStats {
            size,
            hits: self.hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.computations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.abandoned.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}
