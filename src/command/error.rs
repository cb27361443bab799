use std::any::Any;
use std::error::Error as StdError;

use thiserror::Error;

use crate::bus::PublishError;
use crate::entity::PayloadError;
use crate::repository::RepositoryError;

/// Failure returned by a command handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler subscribed for command: {0}")]
    UnknownCommand(String),
    #[error("failed to decode command payload: {0}")]
    DecodeFailed(String),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("aggregate not found: {0}")]
    NotFound(String),
    #[error("aggregate already exists: {0}")]
    AlreadyExists(String),
    #[error("command targets aggregate {target} but the handler accessed {requested}")]
    ForeignAggregate { target: String, requested: String },
    #[error("aggregate {0} is cached with a different type")]
    TypeMismatch(String),
    #[error("aggregate {id} changed concurrently (cached version {expected}, stored version {actual})")]
    ConcurrencyConflict {
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(Box<dyn StdError + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        HandlerError::Other(Box::new(err))
    }
}

/// Readable text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl From<PayloadError> for HandlerError {
    fn from(err: PayloadError) -> Self {
        HandlerError::DecodeFailed(err.message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Failure delivered to a command's callback.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Handler(HandlerError),
    #[error("aggregate {id} changed concurrently (expected version {expected}, stored version {actual})")]
    ConcurrencyConflict {
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("event store rejected the events: {0}")]
    Store(RepositoryError),
    #[error("events were stored but publishing failed: {0}")]
    Publish(#[from] PublishError),
    #[error("aggregate {0} was computed from state invalidated by an earlier failure")]
    AggregateStateCorrupted(String),
    #[error("command bus halted before the command completed")]
    Halted,
}

impl CommandError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommandError::ConcurrencyConflict { .. })
    }

    /// The handler failure behind this error, if any.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            CommandError::Handler(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HandlerError> for CommandError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::ConcurrencyConflict {
                id,
                expected,
                actual,
            } => CommandError::ConcurrencyConflict {
                id,
                expected,
                actual,
            },
            other => CommandError::Handler(other),
        }
    }
}

/// Synchronous failure of a dispatch call. The command never entered the ring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("command bus has not been started")]
    NotStarted,
    #[error("command bus is stopped")]
    Stopped,
    #[error("command {0} has no target aggregate identifier")]
    MissingAggregateId(String),
}
