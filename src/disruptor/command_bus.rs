//! Ring-buffer command bus.
//!
//! `CommandBus` accepts commands from any number of threads and runs them
//! through a fixed pipeline of worker threads: invokers execute handlers
//! against cached aggregates, publishers store and publish the resulting
//! events and complete callbacks.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_ringbus::{BusConfig, Command, CommandBus, InMemoryEventBus, InMemoryEventStore};
//!
//! let bus = CommandBus::new(BusConfig::default(), InMemoryEventStore::new(), InMemoryEventBus::new())?;
//! let counters = bus.create_repository(Counter::default);
//!
//! bus.subscribe("counter.increment", move |command, uow| {
//!     let counter = counters.load(uow, &command.aggregate_id)?;
//!     counter.increment()?;
//!     Ok(json!({ "value": counter.value }))
//! });
//!
//! bus.start();
//! let completion = bus.send(Command::new("counter.increment", "c-1", vec![]))?;
//! let value = completion.wait()?;
//!
//! let stats = bus.stop();
//! println!("{} commands succeeded", stats.succeeded);
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde_json::Value;

use crate::aggregate::Aggregate;
use crate::bus::EventBus;
use crate::command::{
    Command, CommandCallback, CommandHandler, CommandOutcome, Completion, DispatchError,
    HandlerError, HandlerRegistry, Registration, UnitOfWork,
};
use crate::repository::{EventStore, Repository};
use crate::snapshot::{SnapshotStore, Snapshottable};

use super::entry::{route_key, CommandEntry, PendingCommand};
use super::invoker::CommandHandlerInvoker;
use super::metrics::{BusMetrics, BusStats};
use super::pipeline::Pipeline;
use super::publisher::EventPublisher;
use super::{rescheduler, BusConfig, ConfigError};

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

struct Workers {
    invokers: Vec<JoinHandle<()>>,
    publishers: Vec<JoinHandle<()>>,
    rescheduler: JoinHandle<u64>,
}

/// Concurrent command bus for event-sourced aggregates.
pub struct CommandBus {
    config: Arc<BusConfig>,
    store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    registry: Arc<HandlerRegistry>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<BusMetrics>,
    state: AtomicU8,
    workers: Mutex<Option<Workers>>,
}

impl CommandBus {
    pub fn new<S, B>(config: BusConfig, event_store: S, event_bus: B) -> Result<Self, ConfigError>
    where
        S: EventStore + 'static,
        B: EventBus + 'static,
    {
        config.validate()?;
        let pipeline = Arc::new(Pipeline::new(&config));

        Ok(CommandBus {
            config: Arc::new(config),
            store: Arc::new(event_store),
            event_bus: Arc::new(event_bus),
            snapshots: None,
            registry: Arc::new(HandlerRegistry::new()),
            pipeline,
            metrics: Arc::new(BusMetrics::default()),
            state: AtomicU8::new(CREATED),
            workers: Mutex::new(None),
        })
    }

    /// Store snapshots captured by snapshot-enabled repositories, and restore
    /// aggregates from them.
    pub fn with_snapshot_store<S>(mut self, store: S) -> Self
    where
        S: SnapshotStore + 'static,
    {
        self.snapshots = Some(Arc::new(store));
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register `handler` for commands named `command_name`.
    pub fn subscribe<F>(&self, command_name: &str, handler: F) -> Registration
    where
        F: Fn(&Command, &mut UnitOfWork<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.registry.subscribe(command_name, handler)
    }

    pub fn subscribe_handler<H: CommandHandler>(&self, command_name: &str, handler: H) -> Registration {
        self.registry.subscribe_handler(command_name, handler)
    }

    /// Repository for use inside handlers of this bus.
    pub fn create_repository<A, F>(&self, factory: F) -> Repository<A>
    where
        A: Aggregate,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Repository::new(factory)
    }

    /// Repository that restores from and captures snapshots.
    pub fn create_snapshot_repository<A, F>(&self, factory: F) -> Repository<A>
    where
        A: Snapshottable,
        F: Fn() -> A + Send + Sync + 'static,
    {
        if self.snapshots.is_none() || self.config.snapshot_threshold == 0 {
            tracing::debug!("snapshot repository created without a snapshot store or threshold");
        }
        Repository::with_snapshots(factory)
    }

    /// Spawn the worker threads. Has no effect on a running or stopped bus.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(RUNNING) => return,
            Err(_) => {
                tracing::warn!("a stopped command bus cannot be restarted");
                return;
            }
        }

        let invokers = (0..self.config.invoker_threads)
            .map(|shard| {
                let invoker = CommandHandlerInvoker::new(
                    shard,
                    Arc::clone(&self.pipeline),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.store),
                    self.snapshots.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.metrics),
                );
                thread::spawn(move || invoker.run())
            })
            .collect();

        let (requests, pending) = mpsc::channel();
        let publishers = (0..self.config.publisher_threads)
            .map(|shard| {
                let publisher = EventPublisher::new(
                    shard,
                    Arc::clone(&self.pipeline),
                    Arc::clone(&self.store),
                    self.snapshots.clone(),
                    Arc::clone(&self.event_bus),
                    requests.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.metrics),
                );
                thread::spawn(move || publisher.run())
            })
            .collect();
        // Publishers hold the only senders; the rescheduler ends when they do.
        drop(requests);
        let rescheduler = rescheduler::spawn(Arc::clone(&self.pipeline), pending);

        *workers = Some(Workers {
            invokers,
            publishers,
            rescheduler,
        });
        tracing::info!(
            buffer_size = self.config.buffer_size,
            invokers = self.config.invoker_threads,
            publishers = self.config.publisher_threads,
            "command bus started"
        );
    }

    /// Drain every accepted command, then stop all worker threads.
    ///
    /// Blocks until complete. Calling it again returns the final stats.
    pub fn stop(&self) -> BusStats {
        let mut workers = self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.state.load(Ordering::SeqCst) {
            CREATED | STOPPED => {
                self.state.store(STOPPED, Ordering::SeqCst);
                return self.stats();
            }
            _ => {}
        }

        self.state.store(STOPPING, Ordering::SeqCst);
        self.pipeline.in_flight.wait_idle();
        self.pipeline.halt();

        if let Some(workers) = workers.take() {
            for handle in workers.invokers.into_iter().chain(workers.publishers) {
                if handle.join().is_err() {
                    tracing::error!("command bus worker panicked");
                }
            }
            match workers.rescheduler.join() {
                Ok(published) => tracing::debug!(published, "rescheduler stopped"),
                Err(_) => tracing::error!("rescheduler panicked"),
            }
        }

        self.state.store(STOPPED, Ordering::SeqCst);
        let stats = self.stats();
        tracing::info!(
            ingested = stats.ingested,
            succeeded = stats.succeeded,
            failed = stats.failed,
            rescheduled = stats.rescheduled,
            "command bus stopped"
        );
        stats
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn stats(&self) -> BusStats {
        self.metrics.snapshot()
    }

    /// Commands accepted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pipeline.in_flight.count()
    }

    /// Dispatch without waiting for or observing the outcome.
    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        self.enqueue(command, None)
    }

    /// Dispatch and deliver the outcome to `callback`, exactly once.
    ///
    /// The callback runs on a publisher thread and must not wait on this bus.
    pub fn dispatch_with<F>(&self, command: Command, callback: F) -> Result<(), DispatchError>
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        self.enqueue(command, Some(Box::new(callback)))
    }

    /// Dispatch and return a handle to wait for the outcome.
    pub fn send(&self, command: Command) -> Result<Completion, DispatchError> {
        let (callback, completion) = Completion::channel(&command);
        self.enqueue(command, Some(callback))?;
        Ok(completion)
    }

    fn enqueue(&self, command: Command, callback: Option<CommandCallback>) -> Result<(), DispatchError> {
        if command.aggregate_id.is_empty() {
            return Err(DispatchError::MissingAggregateId(command.id));
        }

        // Counted before the state check so `stop` cannot miss this command.
        let in_flight = &self.pipeline.in_flight;
        in_flight.begin();
        match self.state.load(Ordering::SeqCst) {
            RUNNING => {}
            state => {
                in_flight.end();
                return Err(if state == CREATED {
                    DispatchError::NotStarted
                } else {
                    DispatchError::Stopped
                });
            }
        }

        self.metrics.ingested();
        let route = route_key(&command.aggregate_id);
        let entry = CommandEntry::Command(PendingCommand::new(command, callback, self.config.conflict_retries));
        if self.pipeline.publish(route, entry).is_err() {
            in_flight.end();
            return Err(DispatchError::Stopped);
        }
        Ok(())
    }
}

impl Drop for CommandBus {
    fn drop(&mut self) {
        self.stop();
    }
}
