//! Core publishing trait for the event bus.

use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

use crate::entity::DomainEvent;

/// Error type for publish operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Connection to the bus failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The bus rejected the events
    #[error("Events rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("Publish timeout")]
    Timeout,
    /// Other error
    #[error("Publish error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

/// Publishes committed domain events to interested parties.
///
/// Called once per successful command with that command's events, in
/// the order they were stored. Calls for one aggregate arrive in commit order.
pub trait EventBus: Send + Sync {
    fn publish(&self, events: &[DomainEvent]) -> Result<(), PublishError>;
}

impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    fn publish(&self, events: &[DomainEvent]) -> Result<(), PublishError> {
        (**self).publish(events)
    }
}

/// An event bus that drops everything. Useful when nothing subscribes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&self, _events: &[DomainEvent]) -> Result<(), PublishError> {
        Ok(())
    }
}
