//! Ring-buffer command bus for event-sourced aggregates.
//!
//! Commands are dispatched into a [`ring::RingBuffer`] and consumed by sharded
//! invoker threads, which run handlers against aggregates cached per shard, and
//! by sharded publisher threads, which store and publish the resulting events
//! in acceptance order. See [`CommandBus`].

mod aggregate;
mod bus;
mod command;
mod disruptor;
mod entity;
mod repository;
pub mod ring;
mod snapshot;

pub use aggregate::{hydrate, Aggregate};
pub use bus::{EventBus, InMemoryEventBus, NoopEventBus, PublishError};
pub use command::{
    Command, CommandCallback, CommandError, CommandFailure, CommandHandler, CommandOutcome,
    Completion, DispatchError, HandlerError, HandlerRegistry, Registration, RollbackPolicy,
    UnitOfWork,
};
pub use disruptor::{BusConfig, BusStats, CommandBus, ConfigError};
pub use entity::{DomainEvent, Entity, PayloadError};
pub use repository::{AggregateCache, EventStore, InMemoryEventStore, Repository, RepositoryError};
pub use ring::{ProducerType, WaitStrategy};
pub use snapshot::{InMemorySnapshotStore, SnapshotRecord, SnapshotStore, Snapshottable};
