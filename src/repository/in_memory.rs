use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::entity::DomainEvent;

use super::{EventStore, RepositoryError};

type AppendGuard = Arc<dyn Fn(&str, &[DomainEvent]) -> Result<(), RepositoryError> + Send + Sync>;

/// In-memory event store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage). Appends are
/// atomic per call: a rejected append leaves no trace in any stream.
#[derive(Clone)]
pub struct InMemoryEventStore {
    storage: Arc<RwLock<HashMap<String, Vec<DomainEvent>>>>,
    guard: Arc<RwLock<Option<AppendGuard>>>,
    stored_events: Arc<AtomicU64>,
    reads: Arc<AtomicU64>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        InMemoryEventStore {
            storage: Arc::new(RwLock::new(HashMap::new())),
            guard: Arc::new(RwLock::new(None)),
            stored_events: Arc::new(AtomicU64::new(0)),
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Install a check run before every append; an `Err` rejects the whole append.
    pub fn reject_appends_when<F>(&self, guard: F) -> Result<(), RepositoryError>
    where
        F: Fn(&str, &[DomainEvent]) -> Result<(), RepositoryError> + Send + Sync + 'static,
    {
        let mut slot = self
            .guard
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("guard write"))?;
        *slot = Some(Arc::new(guard));
        Ok(())
    }

    /// Write events directly, bypassing version checks. Simulates a foreign writer.
    pub fn inject(&self, aggregate_id: &str, events: Vec<DomainEvent>) -> Result<(), RepositoryError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;
        storage
            .entry(aggregate_id.to_string())
            .or_default()
            .extend(events);
        Ok(())
    }

    /// Total number of events durably appended.
    pub fn stored_event_count(&self) -> u64 {
        self.stored_events.load(Ordering::Acquire)
    }

    /// Number of history reads served (full or partial).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    /// Identifiers of every aggregate with at least one stored event.
    pub fn aggregate_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;
        let mut ids: Vec<String> = storage.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn current_guard(&self) -> Result<Option<AppendGuard>, RepositoryError> {
        let guard = self
            .guard
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("guard read"))?;
        Ok(guard.clone())
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        aggregate_id: &str,
        events: &[DomainEvent],
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(guard) = self.current_guard()? {
            guard(aggregate_id, events)?;
        }

        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;
        let stream = storage.entry(aggregate_id.to_string()).or_default();
        let actual = stream.last().map(|event| event.sequence).unwrap_or(0);
        if actual != expected_version {
            return Err(RepositoryError::ConcurrentWrite {
                id: aggregate_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let mut next = expected_version;
        for event in events {
            next += 1;
            if event.sequence != next || event.aggregate_id != aggregate_id {
                return Err(RepositoryError::Storage(format!(
                    "event {} for {} is out of sequence (expected {})",
                    event.sequence, event.aggregate_id, next
                )));
            }
        }

        stream.extend_from_slice(events);
        self.stored_events
            .fetch_add(events.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn read_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, RepositoryError> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;
        Ok(storage.get(aggregate_id).cloned().unwrap_or_default())
    }

    fn read_events_after(
        &self,
        aggregate_id: &str,
        after: u64,
    ) -> Result<Vec<DomainEvent>, RepositoryError> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;
        Ok(storage
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|event| event.sequence > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn last_sequence(&self, aggregate_id: &str) -> Result<u64, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;
        Ok(storage
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map(|event| event.sequence)
            .unwrap_or(0))
    }
}
