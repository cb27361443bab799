use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::command::{
    panic_message, Command, HandlerError, HandlerRegistry, PersistenceFence, UnitHooks, UnitOfWork,
};
use crate::repository::{AggregateCache, EventStore};
use crate::snapshot::SnapshotStore;

use super::entry::{route_key, shard_of, CommandEntry, Invocation};
use super::metrics::BusMetrics;
use super::pipeline::Pipeline;
use super::BusConfig;

/// Waits on the publisher that owns an aggregate.
struct PublisherFence<'p> {
    pipeline: &'p Pipeline,
}

impl PersistenceFence for PublisherFence<'_> {
    fn wait_persisted(&self, aggregate_id: &str, sequence: u64) -> Result<(), HandlerError> {
        let shard = shard_of(route_key(aggregate_id), self.pipeline.publisher_count());
        let publisher = &self.pipeline.publisher_sequences[shard];
        // The publisher may be parked waiting for this invoker's progress.
        self.pipeline.waiter.signal_all();
        self.pipeline
            .waiter
            .wait_until(self.pipeline.alert(), || publisher.get() > sequence)
            .map_err(HandlerError::other)
    }
}

/// Runs command handlers for one shard of aggregates.
///
/// Owns the shard's aggregate cache outright; nothing else ever touches it.
pub(crate) struct CommandHandlerInvoker {
    shard: usize,
    pipeline: Arc<Pipeline>,
    cache: AggregateCache,
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    config: Arc<BusConfig>,
    metrics: Arc<BusMetrics>,
}

impl CommandHandlerInvoker {
    pub fn new(
        shard: usize,
        pipeline: Arc<Pipeline>,
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn EventStore>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        config: Arc<BusConfig>,
        metrics: Arc<BusMetrics>,
    ) -> Self {
        CommandHandlerInvoker {
            shard,
            pipeline,
            cache: AggregateCache::new(),
            registry,
            store,
            snapshots,
            config,
            metrics,
        }
    }

    /// Consume the ring until the pipeline halts.
    pub fn run(mut self) {
        let pipeline = Arc::clone(&self.pipeline);
        let sequence = Arc::clone(&pipeline.invoker_sequences[self.shard]);
        let shards = pipeline.invoker_count();
        let capacity = pipeline.ring.capacity() as u64;

        let mut next = sequence.get();
        let mut pruned_at = next;
        while let Ok(available) = pipeline.ring.wait_for_published(next) {
            for current in next..available {
                if shard_of(pipeline.ring.route(current), shards) == self.shard {
                    self.process(&pipeline, current);
                }
                sequence.set(current + 1);
            }
            pipeline.waiter.signal();
            next = available;

            if next - pruned_at >= capacity {
                self.prune_fences(&pipeline);
                pruned_at = next;
            }
        }

        tracing::debug!(shard = self.shard, cached = self.cache.len(), "invoker stopped");
    }

    fn process(&mut self, pipeline: &Pipeline, sequence: u64) {
        // SAFETY: `sequence` is published and routed to this shard. Other invokers
        // only read its route, and publishers cannot reach it before this
        // invoker's sequence moves past it.
        let entry = unsafe { pipeline.ring.slot_mut(sequence) };
        match entry {
            CommandEntry::Vacant => {}
            CommandEntry::Recovery(aggregate_id) => {
                if self.cache.evict(aggregate_id) {
                    self.metrics.evicted();
                }
                tracing::debug!(shard = self.shard, aggregate_id = %aggregate_id, sequence, "recovery entry processed");
            }
            CommandEntry::Command(pending) => {
                pending.invocation = self.invoke(pipeline, sequence, &pending.command);
            }
        }
    }

    fn invoke(&mut self, pipeline: &Pipeline, sequence: u64, command: &Command) -> Invocation {
        let Some(handler) = self.registry.get(&command.command_name) else {
            return Invocation::Failed {
                error: HandlerError::UnknownCommand(command.command_name.clone()),
                hooks: UnitHooks::default(),
            };
        };

        let fence = PublisherFence { pipeline };
        let mut uow = UnitOfWork::new(
            command,
            sequence,
            &mut self.cache,
            &*self.store,
            self.snapshots.as_deref(),
            &fence,
            self.config.conflict_retries,
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(command, &mut uow)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));
        let (loads, hooks) = uow.finish();
        self.metrics.loaded(loads);

        let aggregate_id = &command.aggregate_id;
        match result {
            Ok(result) => Invocation::Succeeded {
                result,
                handoff: self
                    .cache
                    .hand_off(aggregate_id, &command.id, self.config.snapshot_threshold),
                hooks,
            },
            Err(error) => {
                if let HandlerError::Panicked(message) = &error {
                    tracing::error!(command = %command.command_name, aggregate_id = %aggregate_id, panic = %message, "command handler panicked");
                }

                // Applied events already changed the cached state, so it cannot be kept.
                let dirty = self.cache.discard(aggregate_id);
                if (dirty || self.config.rollback_policy.should_invalidate(&error))
                    && self.cache.evict(aggregate_id)
                {
                    self.metrics.evicted();
                    tracing::debug!(shard = self.shard, aggregate_id = %aggregate_id, sequence, error = %error, "aggregate invalidated");
                }
                Invocation::Failed { error, hooks }
            }
        }
    }

    fn prune_fences(&mut self, pipeline: &Pipeline) {
        let publishers = pipeline.publisher_count();
        self.cache.prune_fences(|aggregate_id| {
            pipeline.publisher_sequences[shard_of(route_key(aggregate_id), publishers)].get()
        });
    }
}
