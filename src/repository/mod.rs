mod cache;
mod error;
mod event_store;
mod in_memory;
#[allow(clippy::module_inception)]
mod repository;

pub use cache::AggregateCache;
pub(crate) use cache::{AnyAggregate, Handoff, SnapshotEncoder};
pub use error::RepositoryError;
pub use event_store::EventStore;
pub use in_memory::InMemoryEventStore;
pub use repository::Repository;
