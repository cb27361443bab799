//! In-memory event bus for testing and single-process scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use crate::entity::DomainEvent;

use super::{EventBus, PublishError};

/// In-memory event bus.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Published events are stored in an append-only log
/// - Each subscriber created with `new_subscriber()` tracks its own read position
///
/// ## Example
///
/// ```
/// use sourced_ringbus::{EventBus, InMemoryEventBus};
/// use sourced_ringbus::DomainEvent;
///
/// let bus = InMemoryEventBus::new();
/// let event = DomainEvent::encode("c1", 1, "Created", &"c1").unwrap();
/// bus.publish(&[event]).unwrap();
///
/// let received = bus.poll(Default::default()).unwrap();
/// assert_eq!(received.event_name, "Created");
/// ```
#[derive(Clone)]
pub struct InMemoryEventBus {
    log: Arc<RwLock<Vec<DomainEvent>>>,
    position: Arc<Mutex<usize>>,
    batches: Arc<AtomicUsize>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            position: Arc::new(Mutex::new(0)),
            batches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a subscriber sharing the same log with its own read position.
    pub fn new_subscriber(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            position: Arc::new(Mutex::new(0)),
            batches: Arc::clone(&self.batches),
        }
    }

    /// Read access to the log. The log is append-only, so a lock poisoned by a
    /// panicking writer still holds every event published before it.
    fn read_log(&self) -> RwLockReadGuard<'_, Vec<DomainEvent>> {
        self.log
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All published events, in publication order.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.read_log().clone()
    }

    /// Published events of one aggregate, in publication order.
    pub fn events_for(&self, aggregate_id: &str) -> Vec<DomainEvent> {
        self.read_log()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect()
    }

    pub fn find_all_by_name(&self, event_name: &str) -> Vec<DomainEvent> {
        self.read_log()
            .iter()
            .filter(|e| e.event_name == event_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `publish` calls received.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::Acquire)
    }

    /// Next unread event for this subscriber, waiting up to `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<DomainEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let log = self.read_log();
                let mut pos = self.position.lock().ok()?;

                if *pos < log.len() {
                    let event = log[*pos].clone();
                    *pos += 1;
                    return Some(event);
                }
            }

            if Instant::now() >= deadline {
                return None;
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, events: &[DomainEvent]) -> Result<(), PublishError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| PublishError::Rejected("event log lock poisoned".into()))?;
        log.extend_from_slice(events);
        self.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
