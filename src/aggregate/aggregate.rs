use std::fmt;

use serde::Serialize;

use crate::entity::{DomainEvent, Entity};
use crate::repository::RepositoryError;

/// Trait for domain aggregates that can be event-sourced.
///
/// State only changes inside [`Aggregate::replay_event`]; business methods
/// call [`Aggregate::apply`], which records the event and then replays it.
pub trait Aggregate: Send + 'static {
    type ReplayError: fmt::Display;

    fn entity(&self) -> &Entity;
    fn entity_mut(&mut self) -> &mut Entity;

    /// The event-sourcing apply function.
    fn replay_event(&mut self, event: &DomainEvent) -> Result<(), Self::ReplayError>;

    fn id(&self) -> &str {
        self.entity().id()
    }

    fn version(&self) -> u64 {
        self.entity().version()
    }

    /// Record a new event at the next version and apply it to this aggregate.
    fn apply<T: Serialize>(&mut self, event_name: &str, payload: &T) -> Result<(), RepositoryError>
    where
        Self: Sized,
    {
        let Some(event) = self.entity_mut().record(event_name, payload)? else {
            return Ok(());
        };
        self.replay_event(&event)
            .map_err(|err| RepositoryError::Replay(err.to_string()))
    }
}

#[macro_export]
macro_rules! impl_aggregate {
    ($ty:ty, $entity:ident, $replay:ident) => {
        $crate::impl_aggregate!($ty, $entity, $replay, String);
    };
    ($ty:ty, $entity:ident, $replay:ident, $err:ty) => {
        impl $crate::Aggregate for $ty {
            type ReplayError = $err;

            fn entity(&self) -> &$crate::Entity {
                &self.$entity
            }

            fn entity_mut(&mut self) -> &mut $crate::Entity {
                &mut self.$entity
            }

            fn replay_event(
                &mut self,
                event: &$crate::DomainEvent,
            ) -> Result<(), Self::ReplayError> {
                Self::$replay(self, event)
            }
        }
    };
}

/// Replay stored events onto an aggregate, in order, then mark it loaded.
///
/// Events must continue the aggregate's current version without gaps.
pub fn hydrate<A: Aggregate>(aggregate: &mut A, events: &[DomainEvent]) -> Result<(), RepositoryError> {
    aggregate.entity_mut().set_replaying(true);
    for event in events {
        let expected = aggregate.version() + 1;
        if event.sequence != expected {
            aggregate.entity_mut().set_replaying(false);
            return Err(RepositoryError::Replay(format!(
                "event {} of {} is out of order (expected {})",
                event.sequence, event.aggregate_id, expected
            )));
        }
        if let Err(err) = aggregate.replay_event(event) {
            aggregate.entity_mut().set_replaying(false);
            return Err(RepositoryError::Replay(err.to_string()));
        }
        aggregate.entity_mut().replayed(event);
    }
    aggregate.entity_mut().set_replaying(false);

    let version = aggregate.version();
    aggregate.entity_mut().loaded(version);
    Ok(())
}
