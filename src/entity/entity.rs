use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use super::{DomainEvent, PayloadError};

/// Event-sourcing bookkeeping embedded in every aggregate.
///
/// Tracks the aggregate identifier, the version reached by applied events,
/// the version last handed off for commit, and the events recorded since.
pub struct Entity {
    id: String,
    version: u64,
    committed_version: u64,
    snapshot_version: u64,
    pending: Vec<DomainEvent>,
    replaying: bool,
    timestamp: SystemTime,
}

impl Default for Entity {
    fn default() -> Self {
        Entity {
            id: String::new(),
            version: 0,
            committed_version: 0,
            snapshot_version: 0,
            pending: Vec::new(),
            replaying: false,
            timestamp: SystemTime::now(),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("committed_version", &self.committed_version)
            .field("snapshot_version", &self.snapshot_version)
            .field("pending", &self.pending.len())
            .field("replaying", &self.replaying)
            .finish()
    }
}

impl Entity {
    pub fn new() -> Self {
        Entity::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut entity = Entity::default();
        entity.id = id.into();
        entity
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the last event handed off for durable commit (or loaded from the store).
    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    pub fn set_snapshot_version(&mut self, snapshot_version: u64) {
        self.snapshot_version = snapshot_version;
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Events recorded since the last hand-off, in application order.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.version != self.committed_version
    }

    /// Record a new event at the next sequence. Returns `None` while replaying.
    pub fn record<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Option<DomainEvent>, PayloadError> {
        if self.replaying {
            return Ok(None);
        }

        let event = DomainEvent::encode(self.id.clone(), self.version + 1, name, payload)?;
        self.pending.push(event.clone());
        self.version = event.sequence;
        self.timestamp = SystemTime::now();
        Ok(Some(event))
    }

    /// Advance the version past an event applied during replay.
    pub fn replayed(&mut self, event: &DomainEvent) {
        self.version = event.sequence;
        self.timestamp = event.timestamp;
    }

    /// Mark the entity as reconstructed at `version`, with nothing pending.
    pub fn loaded(&mut self, version: u64) {
        self.version = version;
        self.committed_version = version;
        self.pending.clear();
    }

    /// Hand off the pending events; the entity now assumes them committed.
    pub fn take_pending(&mut self) -> Vec<DomainEvent> {
        self.committed_version = self.version;
        std::mem::take(&mut self.pending)
    }

    /// Drop pending events without handing them off. Returns how many were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }
}
