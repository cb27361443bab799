use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::aggregate::Aggregate;
use crate::repository::{AggregateCache, AnyAggregate, EventStore, SnapshotEncoder};
use crate::snapshot::SnapshotStore;

use super::error::panic_message;
use super::{Command, CommandError, HandlerError};

type CommitHook = Box<dyn FnOnce() + Send>;
type RollbackHook = Box<dyn FnOnce(&CommandError) + Send>;

/// Waits until a shard's publisher has persisted everything up to a ring sequence.
pub(crate) trait PersistenceFence {
    fn wait_persisted(&self, aggregate_id: &str, sequence: u64) -> Result<(), HandlerError>;
}

/// Callbacks registered by a handler, run on the publisher thread once the
/// command's outcome is known.
#[derive(Default)]
pub(crate) struct UnitHooks {
    commit: Vec<CommitHook>,
    rollback: Vec<RollbackHook>,
}

impl UnitHooks {
    pub fn is_empty(&self) -> bool {
        self.commit.is_empty() && self.rollback.is_empty()
    }

    pub fn committed(self) {
        for hook in self.commit {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                tracing::error!(panic = %panic_message(payload.as_ref()), "commit hook panicked");
            }
        }
    }

    pub fn rolled_back(self, error: &CommandError) {
        for hook in self.rollback {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(error))) {
                tracing::error!(panic = %panic_message(payload.as_ref()), "rollback hook panicked");
            }
        }
    }
}

impl fmt::Debug for UnitHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHooks")
            .field("commit", &self.commit.len())
            .field("rollback", &self.rollback.len())
            .finish()
    }
}

/// Execution context of one command on its invoker thread.
///
/// Gives the handler access to exactly one aggregate, the command's target,
/// through a [`Repository`](crate::repository::Repository). Events recorded on
/// that aggregate become the command's uncommitted events; the invoker hands
/// them to the publisher on success and discards them on failure.
pub struct UnitOfWork<'a> {
    command: &'a Command,
    sequence: u64,
    cache: &'a mut AggregateCache,
    store: &'a dyn EventStore,
    snapshots: Option<&'a dyn SnapshotStore>,
    fence: &'a dyn PersistenceFence,
    conflict_retries: u32,
    loads: u32,
    hooks: UnitHooks,
}

impl<'a> UnitOfWork<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        command: &'a Command,
        sequence: u64,
        cache: &'a mut AggregateCache,
        store: &'a dyn EventStore,
        snapshots: Option<&'a dyn SnapshotStore>,
        fence: &'a dyn PersistenceFence,
        conflict_retries: u32,
    ) -> Self {
        UnitOfWork {
            command,
            sequence,
            cache,
            store,
            snapshots,
            fence,
            conflict_retries,
            loads: 0,
            hooks: UnitHooks::default(),
        }
    }

    pub fn command(&self) -> &Command {
        self.command
    }

    pub fn aggregate_id(&self) -> &str {
        &self.command.aggregate_id
    }

    /// Ring sequence of the command being handled.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run `hook` after the command's events are durably stored.
    pub fn on_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.commit.push(Box::new(hook));
    }

    /// Run `hook` when the command fails and nothing was stored.
    pub fn on_rollback<F>(&mut self, hook: F)
    where
        F: FnOnce(&CommandError) + Send + 'static,
    {
        self.hooks.rollback.push(Box::new(hook));
    }

    pub(crate) fn ensure_target(&self, id: &str) -> Result<(), HandlerError> {
        if id == self.command.aggregate_id {
            Ok(())
        } else {
            Err(HandlerError::ForeignAggregate {
                target: self.command.aggregate_id.clone(),
                requested: id.to_string(),
            })
        }
    }

    pub(crate) fn store(&self) -> &'a dyn EventStore {
        self.store
    }

    pub(crate) fn snapshot_store(&self) -> Option<&'a dyn SnapshotStore> {
        self.snapshots
    }

    pub(crate) fn conflict_retries(&self) -> u32 {
        self.conflict_retries
    }

    pub(crate) fn cached_version(&self, id: &str) -> Option<u64> {
        self.cache.committed_version(id)
    }

    pub(crate) fn evict(&mut self, id: &str) {
        if self.cache.evict(id) {
            tracing::debug!(aggregate_id = %id, sequence = self.sequence, "evicted stale aggregate");
        }
    }

    /// Block until earlier work on an evicted aggregate is persisted.
    pub(crate) fn await_reload(&self, id: &str) -> Result<(), HandlerError> {
        match self.cache.reload_fence(id) {
            Some(sequence) => self.fence.wait_persisted(id, sequence),
            None => Ok(()),
        }
    }

    pub(crate) fn cache_aggregate(
        &mut self,
        id: &str,
        aggregate: Box<dyn AnyAggregate>,
        encode_snapshot: Option<SnapshotEncoder>,
    ) {
        self.cache.insert(id, aggregate, encode_snapshot, self.sequence);
    }

    pub(crate) fn record_load(&mut self) {
        self.loads += 1;
    }

    /// The cached aggregate, typed and marked as used by this command.
    pub(crate) fn aggregate_mut<A: Aggregate>(&mut self, id: &str) -> Result<&mut A, HandlerError> {
        self.cache.touch(id, self.sequence);
        self.cache
            .get_mut(id)
            .ok_or_else(|| HandlerError::NotFound(id.to_string()))?
            .as_any_mut()
            .downcast_mut::<A>()
            .ok_or_else(|| HandlerError::TypeMismatch(id.to_string()))
    }

    /// Number of aggregates reconstructed from the store, and the hooks.
    pub(crate) fn finish(self) -> (u32, UnitHooks) {
        (self.loads, self.hooks)
    }
}

impl fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("command", &self.command.id)
            .field("aggregate_id", &self.command.aggregate_id)
            .field("sequence", &self.sequence)
            .field("hooks", &self.hooks)
            .finish()
    }
}
