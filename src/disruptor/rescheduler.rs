//! Background producer for entries the pipeline itself needs to publish.
//!
//! Publishers must never block on a full ring (they are what frees it), so
//! they hand recovery entries and retried commands to this thread instead.
//! A single FIFO keeps a recovery entry ahead of the commands rescheduled
//! after it.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::command::{Command, CommandCallback};

use super::entry::{route_key, CommandEntry, PendingCommand};
use super::pipeline::Pipeline;

pub(crate) enum Reschedule {
    /// Evict the aggregate in its invoker and clear its publisher blacklist.
    Recover(String),
    /// Run a command again from the start of the pipeline.
    Retry {
        command: Command,
        callback: Option<CommandCallback>,
        retries_left: u32,
    },
}

/// Spawn the rescheduler. It exits once every sender is dropped and returns
/// the number of entries it published.
pub(crate) fn spawn(pipeline: Arc<Pipeline>, requests: Receiver<Reschedule>) -> JoinHandle<u64> {
    thread::spawn(move || {
        let mut published = 0;
        for request in requests {
            let (route, entry) = match request {
                Reschedule::Recover(aggregate_id) => {
                    (route_key(&aggregate_id), CommandEntry::Recovery(aggregate_id))
                }
                Reschedule::Retry {
                    command,
                    callback,
                    retries_left,
                } => (
                    route_key(&command.aggregate_id),
                    CommandEntry::Command(PendingCommand::new(command, callback, retries_left)),
                ),
            };

            match pipeline.publish(route, entry) {
                Ok(_) => published += 1,
                Err(_) => {
                    // The entry and any callback it carried are dropped; waiters see a halt.
                    tracing::error!("ring halted before a rescheduled entry could be published");
                    pipeline.in_flight.end();
                }
            }
        }
        published
    })
}
