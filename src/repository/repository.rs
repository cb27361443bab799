use std::fmt;
use std::sync::Arc;

use crate::aggregate::{hydrate, Aggregate};
use crate::command::{HandlerError, UnitOfWork};
use crate::snapshot::Snapshottable;

use super::cache::{AnyAggregate, SnapshotEncoder};
use super::RepositoryError;

type Factory<A> = Arc<dyn Fn() -> A + Send + Sync>;
type SnapshotRestorer<A> = fn(&mut A, &[u8]) -> Result<(), RepositoryError>;

struct SnapshotCodec<A> {
    encode: SnapshotEncoder,
    restore: SnapshotRestorer<A>,
}

impl<A> Clone for SnapshotCodec<A> {
    fn clone(&self) -> Self {
        SnapshotCodec {
            encode: self.encode,
            restore: self.restore,
        }
    }
}

/// Loads and creates aggregates of one type from inside command handlers.
///
/// A repository holds no state of its own: aggregates live in the cache of the
/// invoker shard that owns them, reached through the handler's [`UnitOfWork`].
/// Cheap to clone into handler closures.
pub struct Repository<A> {
    factory: Factory<A>,
    snapshots: Option<SnapshotCodec<A>>,
}

impl<A> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Repository {
            factory: Arc::clone(&self.factory),
            snapshots: self.snapshots.clone(),
        }
    }
}

impl<A> fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate", &std::any::type_name::<A>())
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl<A: Aggregate> Repository<A> {
    /// `factory` creates the blank instance that history is replayed onto.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Repository {
            factory: Arc::new(factory),
            snapshots: None,
        }
    }

    pub fn is_snapshot_enabled(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Resolve the command's target aggregate.
    ///
    /// A cached instance is used when its committed version still matches the
    /// store; otherwise it is evicted and rebuilt, up to the configured retry
    /// budget. A miss replays history, starting from a snapshot when one applies.
    pub fn load<'u>(&self, uow: &'u mut UnitOfWork<'_>, id: &str) -> Result<&'u mut A, HandlerError> {
        uow.ensure_target(id)?;

        let mut conflicts = 0;
        loop {
            let Some(committed) = uow.cached_version(id) else {
                let aggregate = self.reconstruct(uow, id)?;
                uow.cache_aggregate(id, Box::new(aggregate), self.snapshot_encoder());
                uow.record_load();
                break;
            };

            let stored = uow.store().last_sequence(id)?;
            if stored <= committed {
                break;
            }

            uow.evict(id);
            conflicts += 1;
            if conflicts > uow.conflict_retries() {
                return Err(HandlerError::ConcurrencyConflict {
                    id: id.to_string(),
                    expected: committed,
                    actual: stored,
                });
            }
            tracing::debug!(aggregate_id = %id, committed, stored, "cached aggregate is stale, reloading");
        }

        uow.aggregate_mut::<A>(id)
    }

    /// Create the command's target aggregate with `factory`.
    ///
    /// Events the factory applies become the command's first uncommitted events
    /// and are stored against an empty stream.
    pub fn new_instance<'u, F>(&self, uow: &'u mut UnitOfWork<'_>, factory: F) -> Result<&'u mut A, HandlerError>
    where
        F: FnOnce() -> Result<A, HandlerError>,
    {
        let aggregate = factory()?;
        let id = aggregate.id().to_string();
        uow.ensure_target(&id)?;

        if uow.cached_version(&id).is_some() || uow.store().last_sequence(&id)? > 0 {
            return Err(HandlerError::AlreadyExists(id));
        }

        uow.cache_aggregate(&id, Box::new(aggregate), self.snapshot_encoder());
        uow.aggregate_mut::<A>(&id)
    }

    fn snapshot_encoder(&self) -> Option<SnapshotEncoder> {
        self.snapshots.as_ref().map(|codec| codec.encode)
    }

    fn reconstruct(&self, uow: &UnitOfWork<'_>, id: &str) -> Result<A, HandlerError> {
        uow.await_reload(id)?;

        let mut aggregate = (self.factory)();
        aggregate.entity_mut().set_id(id);

        let after = self.restore_snapshot(uow, &mut aggregate, id)?;
        let events = uow.store().read_events_after(id, after)?;
        if after == 0 && events.is_empty() {
            return Err(HandlerError::NotFound(id.to_string()));
        }

        hydrate(&mut aggregate, &events)?;
        tracing::debug!(aggregate_id = %id, version = aggregate.version(), from_snapshot = after, "aggregate loaded");
        Ok(aggregate)
    }

    /// Apply the latest usable snapshot. Returns the version it restored.
    fn restore_snapshot(&self, uow: &UnitOfWork<'_>, aggregate: &mut A, id: &str) -> Result<u64, HandlerError> {
        let (Some(codec), Some(snapshots)) = (&self.snapshots, uow.snapshot_store()) else {
            return Ok(0);
        };
        let Some(record) = snapshots.get_snapshot(id)? else {
            return Ok(0);
        };

        // A snapshot ahead of the store describes events that were never committed.
        let latest = uow.store().last_sequence(id)?;
        if record.version > latest {
            tracing::warn!(aggregate_id = %id, snapshot = record.version, latest, "ignoring snapshot ahead of the event store");
            return Ok(0);
        }

        (codec.restore)(aggregate, &record.data)?;
        let entity = aggregate.entity_mut();
        entity.loaded(record.version);
        entity.set_snapshot_version(record.version);
        Ok(record.version)
    }
}

impl<A: Snapshottable> Repository<A> {
    /// Like [`Repository::new`], restoring from and capturing snapshots.
    pub fn with_snapshots<F>(factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Repository {
            factory: Arc::new(factory),
            snapshots: Some(SnapshotCodec {
                encode: encode_snapshot::<A>,
                restore: restore_snapshot::<A>,
            }),
        }
    }
}

fn encode_snapshot<A: Snapshottable>(aggregate: &dyn AnyAggregate) -> Result<Vec<u8>, RepositoryError> {
    let aggregate = aggregate
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| RepositoryError::Encode(format!("cached aggregate is not a {}", std::any::type_name::<A>())))?;
    bitcode::serialize(&aggregate.create_snapshot()).map_err(|e| RepositoryError::Encode(e.to_string()))
}

fn restore_snapshot<A: Snapshottable>(aggregate: &mut A, data: &[u8]) -> Result<(), RepositoryError> {
    let snapshot: A::Snapshot =
        bitcode::deserialize(data).map_err(|e| RepositoryError::Replay(format!("snapshot: {e}")))?;
    aggregate.restore_from_snapshot(snapshot);
    Ok(())
}
