use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::HandlerError;

/// Decides whether a handler failure invalidates the cached aggregate.
///
/// Rolling back always discards the command's uncommitted events. When the
/// policy invalidates, the aggregate is also evicted and reloaded from the
/// event store on its next command.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Every failure invalidates.
    Always,
    /// Expected business failures are tolerated; anything else invalidates.
    #[default]
    Selective,
    /// Caller-supplied predicate. Not available from configuration files.
    #[serde(skip)]
    Custom(Arc<dyn Fn(&HandlerError) -> bool + Send + Sync>),
}

impl RollbackPolicy {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&HandlerError) -> bool + Send + Sync + 'static,
    {
        RollbackPolicy::Custom(Arc::new(predicate))
    }

    pub fn should_invalidate(&self, failure: &HandlerError) -> bool {
        match self {
            RollbackPolicy::Always => true,
            RollbackPolicy::Selective => !matches!(
                failure,
                HandlerError::Rejected(_)
                    | HandlerError::NotFound(_)
                    | HandlerError::AlreadyExists(_)
                    | HandlerError::UnknownCommand(_)
                    | HandlerError::DecodeFailed(_)
                    | HandlerError::ForeignAggregate { .. }
            ),
            RollbackPolicy::Custom(predicate) => predicate(failure),
        }
    }
}

impl fmt::Debug for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackPolicy::Always => f.write_str("Always"),
            RollbackPolicy::Selective => f.write_str("Selective"),
            RollbackPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
