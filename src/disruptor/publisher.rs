use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{SendError, Sender};
use std::sync::Arc;

use serde_json::Value;

use crate::bus::{EventBus, PublishError};
use crate::command::{
    panic_message, Command, CommandCallback, CommandError, CommandFailure, CommandOutcome, UnitHooks,
};
use crate::repository::{EventStore, Handoff, RepositoryError};
use crate::snapshot::SnapshotStore;

use super::entry::{shard_of, CommandEntry, Invocation, PendingCommand};
use super::metrics::BusMetrics;
use super::pipeline::Pipeline;
use super::rescheduler::Reschedule;
use super::BusConfig;

/// Stores, publishes and completes the commands of one shard of aggregates,
/// strictly in ring order.
pub(crate) struct EventPublisher {
    shard: usize,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    event_bus: Arc<dyn EventBus>,
    /// Aggregates whose cached state included a commit that failed.
    blacklist: HashSet<String>,
    rescheduler: Sender<Reschedule>,
    config: Arc<BusConfig>,
    metrics: Arc<BusMetrics>,
}

impl EventPublisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shard: usize,
        pipeline: Arc<Pipeline>,
        store: Arc<dyn EventStore>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        event_bus: Arc<dyn EventBus>,
        rescheduler: Sender<Reschedule>,
        config: Arc<BusConfig>,
        metrics: Arc<BusMetrics>,
    ) -> Self {
        EventPublisher {
            shard,
            pipeline,
            store,
            snapshots,
            event_bus,
            blacklist: HashSet::new(),
            rescheduler,
            config,
            metrics,
        }
    }

    /// Consume the ring behind the invokers until the pipeline halts.
    pub fn run(mut self) {
        let pipeline = Arc::clone(&self.pipeline);
        let barrier = pipeline.publisher_barrier();
        let sequence = Arc::clone(&pipeline.publisher_sequences[self.shard]);
        let shards = pipeline.publisher_count();

        let mut next = sequence.get();
        while let Ok(available) = barrier.wait_for(next) {
            for current in next..available {
                if shard_of(pipeline.ring.route(current), shards) == self.shard {
                    // SAFETY: every invoker has moved past `current`, this shard alone
                    // owns its route, and producers cannot reuse the slot before this
                    // publisher's sequence passes it.
                    let entry = std::mem::take(unsafe { pipeline.ring.slot_mut(current) });
                    self.process(entry);
                }
                sequence.set(current + 1);
            }
            pipeline.waiter.signal();
            next = available;
        }

        if !self.blacklist.is_empty() {
            tracing::warn!(shard = self.shard, blacklisted = self.blacklist.len(), "publisher stopped with unrecovered aggregates");
        }
        tracing::debug!(shard = self.shard, "publisher stopped");
    }

    fn process(&mut self, entry: CommandEntry) {
        match entry {
            CommandEntry::Vacant => {}
            CommandEntry::Recovery(aggregate_id) => {
                if self.blacklist.remove(&aggregate_id) {
                    tracing::debug!(shard = self.shard, aggregate_id = %aggregate_id, "aggregate recovered");
                }
                self.pipeline.in_flight.end();
            }
            CommandEntry::Command(pending) => self.complete(pending),
        }
    }

    fn complete(&mut self, pending: PendingCommand) {
        let PendingCommand {
            command,
            callback,
            retries_left,
            invocation,
        } = pending;

        if self.blacklist.contains(&command.aggregate_id) {
            let error = CommandError::AggregateStateCorrupted(command.aggregate_id.clone());
            if let Invocation::Succeeded { hooks, .. } | Invocation::Failed { hooks, .. } = invocation {
                hooks.rolled_back(&error);
            }
            if self.config.reschedule_on_corrupt_state {
                tracing::debug!(command = %command.id, aggregate_id = %command.aggregate_id, "rescheduling command computed on corrupted state");
                self.reschedule(command, callback, retries_left);
            } else {
                tracing::warn!(command = %command.id, aggregate_id = %command.aggregate_id, "rejecting command computed on corrupted state");
                self.fail(command, callback, error);
            }
            return;
        }

        match invocation {
            Invocation::Pending => {
                tracing::error!(command = %command.id, "command reached the publisher without being invoked");
                self.fail(command, callback, CommandError::Halted);
            }
            Invocation::Failed { error, hooks } => {
                let error = CommandError::from(error);
                hooks.rolled_back(&error);
                self.fail(command, callback, error);
            }
            Invocation::Succeeded {
                result,
                handoff,
                hooks,
            } => self.commit(command, callback, retries_left, result, handoff, hooks),
        }
    }

    fn commit(
        &mut self,
        command: Command,
        callback: Option<CommandCallback>,
        retries_left: u32,
        result: Value,
        handoff: Handoff,
        hooks: UnitHooks,
    ) {
        let Handoff {
            events,
            expected_version,
            snapshot,
        } = handoff;

        if events.is_empty() {
            hooks.committed();
            self.succeed(callback, result);
            return;
        }

        let appended = guarded(|| {
            self.store
                .append_events(&command.aggregate_id, &events, expected_version)
        })
        .unwrap_or_else(|panic| {
            tracing::error!(command = %command.id, panic = %panic, "event store panicked during append");
            Err(RepositoryError::Storage(format!("event store panicked: {panic}")))
        });
        if let Err(err) = appended {
            self.invalidate(&command.aggregate_id);
            let error = match err {
                RepositoryError::ConcurrentWrite {
                    id,
                    expected,
                    actual,
                } => CommandError::ConcurrencyConflict {
                    id,
                    expected,
                    actual,
                },
                other => CommandError::Store(other),
            };
            hooks.rolled_back(&error);

            if error.is_conflict() && retries_left > 0 {
                tracing::debug!(command = %command.id, error = %error, retries_left, "retrying command after conflict");
                self.reschedule(command, callback, retries_left - 1);
            } else {
                tracing::warn!(command = %command.id, error = %error, "failed to store events");
                self.fail(command, callback, error);
            }
            return;
        }

        if let (Some(snapshot), Some(snapshots)) = (snapshot, &self.snapshots) {
            let version = snapshot.version;
            match guarded(|| snapshots.save_snapshot(snapshot)) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(aggregate_id = %command.aggregate_id, version, error = %err, "failed to save snapshot");
                }
                Err(panic) => {
                    tracing::error!(aggregate_id = %command.aggregate_id, version, panic = %panic, "snapshot store panicked");
                }
            }
        }

        let published = guarded(|| self.event_bus.publish(&events)).unwrap_or_else(|panic| {
            tracing::error!(command = %command.id, panic = %panic, "event bus panicked during publish");
            Err(PublishError::Rejected(format!("event bus panicked: {panic}")))
        });
        hooks.committed();
        match published {
            Ok(()) => self.succeed(callback, result),
            Err(err) => {
                tracing::warn!(command = %command.id, error = %err, "events stored but not published");
                self.fail(command, callback, CommandError::Publish(err));
            }
        }
    }

    /// Stop accepting results for an aggregate until its invoker has evicted it.
    fn invalidate(&mut self, aggregate_id: &str) {
        self.blacklist.insert(aggregate_id.to_string());
        self.pipeline.in_flight.begin();
        if self
            .rescheduler
            .send(Reschedule::Recover(aggregate_id.to_string()))
            .is_err()
        {
            tracing::error!(aggregate_id = %aggregate_id, "rescheduler gone, aggregate cannot be recovered");
            self.pipeline.in_flight.end();
        }
    }

    fn reschedule(&self, command: Command, callback: Option<CommandCallback>, retries_left: u32) {
        self.metrics.rescheduled();
        let retry = Reschedule::Retry {
            command,
            callback,
            retries_left,
        };
        if let Err(SendError(Reschedule::Retry { command, callback, .. })) = self.rescheduler.send(retry) {
            self.fail(command, callback, CommandError::Halted);
        }
    }

    fn succeed(&self, callback: Option<CommandCallback>, result: Value) {
        self.metrics.succeeded();
        self.deliver(callback, Ok(result));
    }

    fn fail(&self, command: Command, callback: Option<CommandCallback>, error: CommandError) {
        self.metrics.failed();
        self.deliver(callback, Err(CommandFailure { command, error }));
    }

    fn deliver(&self, callback: Option<CommandCallback>, outcome: CommandOutcome) {
        if let Some(callback) = callback {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
                tracing::error!(panic = %panic_message(payload.as_ref()), "command callback panicked");
            }
        }
        self.pipeline.in_flight.end();
    }
}

/// Run a collaborator call on the publisher thread; a panic becomes its message.
fn guarded<T>(call: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| panic_message(payload.as_ref()))
}
