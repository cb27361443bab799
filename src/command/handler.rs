//! Registry mapping command names to handler functions.
//!
//! Handlers receive the command and a [`UnitOfWork`] through which they load
//! or create the target aggregate. They run on invoker threads, one command at
//! a time per aggregate.
//!
//! ## Example
//!
//! ```ignore
//! let registration = bus.subscribe("account.deposit", move |command, uow| {
//!     let amount: u64 = command.decode()?;
//!     let account = accounts.load(uow, &command.aggregate_id)?;
//!     account.deposit(amount)?;
//!     Ok(json!({ "balance": account.balance }))
//! });
//! registration.cancel();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use super::{Command, HandlerError, UnitOfWork};

/// Executes one kind of command against its aggregate.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, command: &Command, uow: &mut UnitOfWork<'_>) -> Result<Value, HandlerError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Command, &mut UnitOfWork<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, command: &Command, uow: &mut UnitOfWork<'_>) -> Result<Value, HandlerError> {
        self(command, uow)
    }
}

struct Subscription {
    token: u64,
    handler: Arc<dyn CommandHandler>,
}

/// Thread-safe handler lookup shared by the bus and every invoker.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Subscription>>,
    next_token: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for `command_name`, replacing any previous handler.
    pub fn subscribe<F>(self: &Arc<Self>, command_name: &str, handler: F) -> Registration
    where
        F: Fn(&Command, &mut UnitOfWork<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_handler(command_name, handler)
    }

    /// Register a [`CommandHandler`] implementation for `command_name`.
    pub fn subscribe_handler<H>(self: &Arc<Self>, command_name: &str, handler: H) -> Registration
    where
        H: CommandHandler,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            token,
            handler: Arc::new(handler),
        };
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(command_name.to_string(), subscription).is_some() {
            tracing::debug!(command_name, "replaced command handler");
        }

        Registration {
            registry: Arc::downgrade(self),
            command_name: command_name.to_string(),
            token,
        }
    }

    pub fn get(&self, command_name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(command_name)
            .map(|subscription| Arc::clone(&subscription.handler))
    }

    /// List registered command names.
    pub fn commands(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn unsubscribe(&self, command_name: &str, token: u64) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match handlers.get(command_name) {
            Some(subscription) if subscription.token == token => {
                handlers.remove(command_name);
                true
            }
            _ => false,
        }
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the handler registered.
#[derive(Debug)]
pub struct Registration {
    registry: Weak<HandlerRegistry>,
    command_name: String,
    token: u64,
}

impl Registration {
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    /// Unregister the handler. Returns false when it was already replaced or
    /// removed.
    pub fn cancel(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(&self.command_name, self.token))
    }
}
