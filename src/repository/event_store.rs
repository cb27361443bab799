use std::sync::Arc;

use crate::entity::DomainEvent;

use super::RepositoryError;

/// Durable, per-aggregate ordered event storage.
pub trait EventStore: Send + Sync {
    /// Append `events` atomically after `expected_version`.
    ///
    /// Returns [`RepositoryError::ConcurrentWrite`] when the stored stream is not at
    /// `expected_version`. Any other error means nothing was stored.
    fn append_events(
        &self,
        aggregate_id: &str,
        events: &[DomainEvent],
        expected_version: u64,
    ) -> Result<(), RepositoryError>;

    /// Read the full history of an aggregate in stored order.
    fn read_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, RepositoryError>;

    /// Read the events with a sequence greater than `after`, in stored order.
    fn read_events_after(
        &self,
        aggregate_id: &str,
        after: u64,
    ) -> Result<Vec<DomainEvent>, RepositoryError> {
        Ok(self
            .read_events(aggregate_id)?
            .into_iter()
            .filter(|event| event.sequence > after)
            .collect())
    }

    /// Sequence of the latest committed event, or 0 when the stream is empty.
    fn last_sequence(&self, aggregate_id: &str) -> Result<u64, RepositoryError> {
        Ok(self
            .read_events(aggregate_id)?
            .last()
            .map(|event| event.sequence)
            .unwrap_or(0))
    }
}

impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    fn append_events(
        &self,
        aggregate_id: &str,
        events: &[DomainEvent],
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        (**self).append_events(aggregate_id, events, expected_version)
    }

    fn read_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, RepositoryError> {
        (**self).read_events(aggregate_id)
    }

    fn read_events_after(
        &self,
        aggregate_id: &str,
        after: u64,
    ) -> Result<Vec<DomainEvent>, RepositoryError> {
        (**self).read_events_after(aggregate_id, after)
    }

    fn last_sequence(&self, aggregate_id: &str) -> Result<u64, RepositoryError> {
        (**self).last_sequence(aggregate_id)
    }
}
