use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::ring::{Alerted, ProducerType, RingBuffer, Sequence, SequenceBarrier, Waiter};

use super::entry::CommandEntry;
use super::BusConfig;

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Commands and recovery entries that have not reached their end yet.
#[derive(Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl InFlight {
    pub fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.idle.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Block until nothing is in flight.
    pub fn wait_idle(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while self.count.load(Ordering::SeqCst) > 0 {
            guard = match self.idle.wait_timeout(guard, IDLE_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// The ring and the progress of every stage reading it.
///
/// Invokers wait for published slots; publishers wait for every invoker;
/// producers wait for every publisher before reusing a slot.
pub(crate) struct Pipeline {
    pub ring: RingBuffer<CommandEntry>,
    pub invoker_sequences: Vec<Arc<Sequence>>,
    pub publisher_sequences: Vec<Arc<Sequence>>,
    pub waiter: Arc<Waiter>,
    pub in_flight: InFlight,
    alert: Arc<AtomicBool>,
    /// Serializes the bus's own producers in single-producer mode.
    producer_lock: Option<Mutex<()>>,
}

impl Pipeline {
    pub fn new(config: &BusConfig) -> Self {
        let invoker_sequences: Vec<_> = (0..config.invoker_threads)
            .map(|_| Arc::new(Sequence::default()))
            .collect();
        let publisher_sequences: Vec<_> = (0..config.publisher_threads)
            .map(|_| Arc::new(Sequence::default()))
            .collect();
        let waiter = Arc::new(Waiter::new(config.wait_strategy));
        let alert = Arc::new(AtomicBool::new(false));

        let ring = RingBuffer::new(
            config.buffer_size,
            config.producer_type,
            publisher_sequences.clone(),
            Arc::clone(&waiter),
            Arc::clone(&alert),
        );
        let producer_lock = match config.producer_type {
            ProducerType::Single => Some(Mutex::new(())),
            ProducerType::Multi => None,
        };

        Pipeline {
            ring,
            invoker_sequences,
            publisher_sequences,
            waiter,
            in_flight: InFlight::default(),
            alert,
            producer_lock,
        }
    }

    pub fn invoker_count(&self) -> usize {
        self.invoker_sequences.len()
    }

    pub fn publisher_count(&self) -> usize {
        self.publisher_sequences.len()
    }

    /// Publish an entry, blocking while the ring is full.
    pub fn publish(&self, route: u64, entry: CommandEntry) -> Result<u64, Alerted> {
        let _serialized = self
            .producer_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        self.ring.publish_with(route, move |slot| *slot = entry)
    }

    pub fn publisher_barrier(&self) -> SequenceBarrier {
        SequenceBarrier::new(
            self.invoker_sequences.clone(),
            Arc::clone(&self.waiter),
            Arc::clone(&self.alert),
        )
    }

    pub fn alert(&self) -> &AtomicBool {
        &self.alert
    }

    /// Release every waiting stage. Only called once nothing is in flight.
    pub fn halt(&self) {
        self.alert.store(true, Ordering::Release);
        self.waiter.signal_all();
    }
}
