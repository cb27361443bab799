use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use crate::aggregate::Aggregate;
use crate::command::panic_message;
use crate::entity::{DomainEvent, Entity, CAUSATION_ID};
use crate::snapshot::SnapshotRecord;

use super::RepositoryError;

/// Object-safe view of a cached aggregate.
pub(crate) trait AnyAggregate: Send {
    fn entity(&self) -> &Entity;
    fn entity_mut(&mut self) -> &mut Entity;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<A: Aggregate> AnyAggregate for A {
    fn entity(&self) -> &Entity {
        Aggregate::entity(self)
    }

    fn entity_mut(&mut self) -> &mut Entity {
        Aggregate::entity_mut(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Serializes a cached aggregate into snapshot bytes.
pub(crate) type SnapshotEncoder = fn(&dyn AnyAggregate) -> Result<Vec<u8>, RepositoryError>;

struct CachedAggregate {
    aggregate: Box<dyn AnyAggregate>,
    /// Ring sequence of the last command that touched the aggregate.
    last_sequence: u64,
    encode_snapshot: Option<SnapshotEncoder>,
}

/// Work produced by one successful command, ready for the publisher.
#[derive(Debug, Default)]
pub(crate) struct Handoff {
    pub events: Vec<DomainEvent>,
    pub expected_version: u64,
    pub snapshot: Option<SnapshotRecord>,
}

/// Aggregates owned by one invoker shard.
///
/// Never shared between threads. Evicted ids remember the ring sequence that
/// last touched them so a reload can wait until that work is persisted.
#[derive(Default)]
pub struct AggregateCache {
    entries: HashMap<String, CachedAggregate>,
    evicted: HashMap<String, u64>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn committed_version(&self, id: &str) -> Option<u64> {
        self.entries
            .get(id)
            .map(|cached| cached.aggregate.entity().committed_version())
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut dyn AnyAggregate> {
        self.entries
            .get_mut(id)
            .map(|cached| cached.aggregate.as_mut() as &mut dyn AnyAggregate)
    }

    pub(crate) fn insert(
        &mut self,
        id: &str,
        aggregate: Box<dyn AnyAggregate>,
        encode_snapshot: Option<SnapshotEncoder>,
        sequence: u64,
    ) {
        self.evicted.remove(id);
        self.entries.insert(
            id.to_string(),
            CachedAggregate {
                aggregate,
                last_sequence: sequence,
                encode_snapshot,
            },
        );
    }

    /// Record that the command at `sequence` used the aggregate.
    pub(crate) fn touch(&mut self, id: &str, sequence: u64) {
        if let Some(cached) = self.entries.get_mut(id) {
            cached.last_sequence = sequence;
        }
    }

    /// Drop a cached aggregate. Returns true when something was removed.
    pub fn evict(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(cached) => {
                self.evicted.insert(id.to_string(), cached.last_sequence);
                true
            }
            None => false,
        }
    }

    /// Ring sequence that must be persisted before `id` may be reloaded.
    pub(crate) fn reload_fence(&self, id: &str) -> Option<u64> {
        self.evicted.get(id).copied()
    }

    /// Forget fences the publishers are already past.
    pub(crate) fn prune_fences(&mut self, persisted_below: impl Fn(&str) -> u64) {
        self.evicted
            .retain(|id, sequence| *sequence >= persisted_below(id.as_str()));
    }

    /// Take the uncommitted events of a successful command, stamped with the
    /// command's id, and capture a snapshot when `threshold` events accumulated
    /// since the last one.
    pub(crate) fn hand_off(&mut self, id: &str, causation_id: &str, threshold: u64) -> Handoff {
        let Some(cached) = self.entries.get_mut(id) else {
            return Handoff::default();
        };

        let entity = cached.aggregate.entity_mut();
        let expected_version = entity.committed_version();
        let mut events = entity.take_pending();
        for event in &mut events {
            event
                .metadata
                .insert(CAUSATION_ID.to_string(), causation_id.to_string());
        }
        let version = entity.version();

        let due = threshold > 0
            && !events.is_empty()
            && version.saturating_sub(entity.snapshot_version()) >= threshold;
        let snapshot = match cached.encode_snapshot {
            Some(encode) if due => match capture(encode, cached.aggregate.as_ref()) {
                Ok(data) => {
                    cached.aggregate.entity_mut().set_snapshot_version(version);
                    Some(SnapshotRecord {
                        aggregate_id: id.to_string(),
                        version,
                        data,
                    })
                }
                Err(err) => {
                    tracing::warn!(aggregate_id = %id, version, error = %err, "snapshot capture failed");
                    None
                }
            },
            _ => None,
        };

        Handoff {
            events,
            expected_version,
            snapshot,
        }
    }

    /// Discard the uncommitted events of a failed command. Returns true when the
    /// aggregate's state moved past its committed version.
    pub(crate) fn discard(&mut self, id: &str) -> bool {
        let Some(cached) = self.entries.get_mut(id) else {
            return false;
        };
        let entity = cached.aggregate.entity_mut();
        let dirty = entity.version() != entity.committed_version();
        entity.discard_pending();
        dirty
    }
}

/// Run a snapshot encoder; user code behind it may panic.
fn capture(encode: SnapshotEncoder, aggregate: &dyn AnyAggregate) -> Result<Vec<u8>, RepositoryError> {
    panic::catch_unwind(AssertUnwindSafe(|| encode(aggregate))).unwrap_or_else(|payload| {
        Err(RepositoryError::Encode(format!(
            "snapshot encoder panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}
