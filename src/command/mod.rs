//! Commands, their handlers and the per-command unit of work.

#[allow(clippy::module_inception)]
mod command;
mod error;
mod handler;
mod rollback;
pub(crate) mod unit_of_work;

pub use command::{Command, CommandCallback, CommandFailure, CommandOutcome, Completion};
pub use error::{CommandError, DispatchError, HandlerError};
pub use handler::{CommandHandler, HandlerRegistry, Registration};
pub use rollback::RollbackPolicy;
pub use unit_of_work::UnitOfWork;
pub(crate) use error::panic_message;
pub(crate) use unit_of_work::{PersistenceFence, UnitHooks};
