use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use super::Waiter;

/// Raised to waiting threads when the pipeline halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sequence barrier alerted")]
pub struct Alerted;

/// Progress counter of one consumer: every sequence below the value is done.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct Sequence {
    value: AtomicU64,
}

impl Sequence {
    pub fn new(value: u64) -> Self {
        Sequence {
            value: AtomicU64::new(value),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }
}

/// Minimum of a group of sequences.
pub fn minimum(sequences: &[Arc<Sequence>], default: u64) -> u64 {
    sequences.iter().map(|s| s.get()).min().unwrap_or(default)
}

/// Lets a consumer wait until every sequence it depends on has moved past a point.
pub struct SequenceBarrier {
    dependents: Vec<Arc<Sequence>>,
    waiter: Arc<Waiter>,
    alert: Arc<AtomicBool>,
}

impl SequenceBarrier {
    pub fn new(dependents: Vec<Arc<Sequence>>, waiter: Arc<Waiter>, alert: Arc<AtomicBool>) -> Self {
        SequenceBarrier {
            dependents,
            waiter,
            alert,
        }
    }

    /// Wait until `next` is done by every dependent; returns the exclusive upper
    /// bound of the sequences now available.
    pub fn wait_for(&self, next: u64) -> Result<u64, Alerted> {
        let mut available = 0;
        self.waiter.wait_until(&self.alert, || {
            available = minimum(&self.dependents, u64::MAX);
            available > next
        })?;
        Ok(available)
    }

    pub fn is_alerted(&self) -> bool {
        self.alert.load(Ordering::Acquire)
    }
}
