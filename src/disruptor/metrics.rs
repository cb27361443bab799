use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a command bus, as returned by `stats()` and `stop()`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Commands accepted by `dispatch`.
    pub ingested: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Commands re-dispatched after a conflict or a corrupted aggregate state.
    pub rescheduled: u64,
    /// Aggregates reconstructed from the event store.
    pub aggregates_loaded: u64,
    pub cache_evictions: u64,
}

impl BusStats {
    /// Commands that reached their callback.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Default)]
pub(crate) struct BusMetrics {
    ingested: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rescheduled: AtomicU64,
    aggregates_loaded: AtomicU64,
    cache_evictions: AtomicU64,
}

impl BusMetrics {
    pub fn ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rescheduled(&self) {
        self.rescheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn loaded(&self, count: u32) {
        if count > 0 {
            self.aggregates_loaded
                .fetch_add(u64::from(count), Ordering::Relaxed);
        }
    }

    pub fn evicted(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStats {
        BusStats {
            ingested: self.ingested.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            aggregates_loaded: self.aggregates_loaded.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
        }
    }
}
