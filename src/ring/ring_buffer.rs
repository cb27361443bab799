use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use super::sequence::minimum;
use super::{Alerted, Sequence, Waiter};

/// How many threads may publish into a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerType {
    /// One publishing thread at a time; claims skip the atomic read-modify-write.
    Single,
    /// Any number of concurrent publishers.
    #[default]
    Multi,
}

struct Slot<T> {
    /// `sequence + 1` of the entry currently held, 0 when never written.
    published: AtomicU64,
    /// Routing key readable by every consumer without touching `value`.
    route: AtomicU64,
    value: UnsafeCell<T>,
}

/// Preallocated, power-of-two sized ring of reusable entries.
///
/// Access to an entry's value is coordinated entirely through sequences: the
/// producer that claimed a sequence owns the slot until it publishes, and after
/// that exactly one consumer per stage may touch the value while the stages
/// behind it are gated. Every consumer may read the routing key.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    producer_type: ProducerType,
    next: AtomicU64,
    gating: Vec<Arc<Sequence>>,
    waiter: Arc<Waiter>,
    alert: Arc<AtomicBool>,
}

// SAFETY: values are only reached through `slot_mut`, whose callers hold the
// sequence-based exclusivity described on the type.
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Default> RingBuffer<T> {
    /// Create a ring with `capacity` entries (a power of two). Producers wait
    /// for every sequence in `gating` before reusing a slot.
    pub fn new(
        capacity: usize,
        producer_type: ProducerType,
        gating: Vec<Arc<Sequence>>,
        waiter: Arc<Waiter>,
        alert: Arc<AtomicBool>,
    ) -> Self {
        debug_assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let slots = (0..capacity)
            .map(|_| Slot {
                published: AtomicU64::new(0),
                route: AtomicU64::new(0),
                value: UnsafeCell::new(T::default()),
            })
            .collect();

        RingBuffer {
            slots,
            mask: capacity as u64 - 1,
            producer_type,
            next: AtomicU64::new(0),
            gating,
            waiter,
            alert,
        }
    }
}

impl<T> RingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn producer_type(&self) -> ProducerType {
        self.producer_type
    }

    /// Next sequence a producer will claim.
    pub fn cursor(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Claim the next sequence, fill its slot and make it visible to consumers.
    ///
    /// Blocks while the ring is full. Fails only when the ring was halted while
    /// waiting for capacity.
    pub fn publish_with<F>(&self, route: u64, fill: F) -> Result<u64, Alerted>
    where
        F: FnOnce(&mut T),
    {
        let sequence = self.claim()?;
        let slot = self.slot(sequence);

        // SAFETY: `sequence` was claimed by this call alone and every consumer has
        // moved past the previous lap of this slot.
        unsafe { fill(&mut *slot.value.get()) };
        slot.route.store(route, Ordering::Relaxed);
        slot.published.store(sequence + 1, Ordering::Release);
        self.waiter.signal();
        Ok(sequence)
    }

    fn claim(&self) -> Result<u64, Alerted> {
        let sequence = match self.producer_type {
            ProducerType::Single => {
                let sequence = self.next.load(Ordering::Relaxed);
                self.next.store(sequence + 1, Ordering::Release);
                sequence
            }
            ProducerType::Multi => self.next.fetch_add(1, Ordering::AcqRel),
        };

        let capacity = self.slots.len() as u64;
        self.waiter.wait_until(&self.alert, || {
            sequence < minimum(&self.gating, u64::MAX).saturating_add(capacity)
        })?;
        Ok(sequence)
    }

    /// Wait until `next` is published; returns the exclusive end of the
    /// contiguous run of published sequences starting at `next`.
    pub fn wait_for_published(&self, next: u64) -> Result<u64, Alerted> {
        self.waiter
            .wait_until(&self.alert, || self.is_published(next))?;

        let limit = next + self.slots.len() as u64;
        let mut end = next + 1;
        while end < limit && self.is_published(end) {
            end += 1;
        }
        Ok(end)
    }

    fn is_published(&self, sequence: u64) -> bool {
        self.slot(sequence).published.load(Ordering::Acquire) == sequence + 1
    }

    /// Routing key of a published sequence.
    pub fn route(&self, sequence: u64) -> u64 {
        self.slot(sequence).route.load(Ordering::Acquire)
    }

    /// Exclusive access to the value at `sequence`.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread allowed to touch this sequence's value:
    /// the sequence is published, the caller's stage owns it, and the stages
    /// behind the caller cannot reach it until the caller's sequence passes it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, sequence: u64) -> &mut T {
        &mut *self.slot(sequence).value.get()
    }

    fn slot(&self, sequence: u64) -> &Slot<T> {
        &self.slots[(sequence & self.mask) as usize]
    }
}
