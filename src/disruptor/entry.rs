use std::fmt;

use serde_json::Value;

use crate::command::{Command, CommandCallback, HandlerError, UnitHooks};
use crate::repository::Handoff;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable routing key of an aggregate identifier (FNV-1a).
pub(crate) fn route_key(aggregate_id: &str) -> u64 {
    aggregate_id
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Shard of a routing key among `shards` workers.
pub(crate) fn shard_of(route: u64, shards: usize) -> usize {
    (route % shards as u64) as usize
}

/// Payload of one ring slot.
#[derive(Default)]
pub(crate) enum CommandEntry {
    #[default]
    Vacant,
    Command(PendingCommand),
    /// Evict the aggregate in its invoker and clear it in its publisher.
    Recovery(String),
}

/// A dispatched command travelling through the pipeline.
pub(crate) struct PendingCommand {
    pub command: Command,
    pub callback: Option<CommandCallback>,
    /// Conflict retries remaining before the conflict is surfaced.
    pub retries_left: u32,
    pub invocation: Invocation,
}

impl PendingCommand {
    pub fn new(command: Command, callback: Option<CommandCallback>, retries_left: u32) -> Self {
        PendingCommand {
            command,
            callback,
            retries_left,
            invocation: Invocation::Pending,
        }
    }
}

/// What the invoker recorded for the publisher.
#[derive(Default)]
pub(crate) enum Invocation {
    #[default]
    Pending,
    Succeeded {
        result: Value,
        handoff: Handoff,
        hooks: UnitHooks,
    },
    Failed {
        error: HandlerError,
        hooks: UnitHooks,
    },
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandEntry::Vacant => f.write_str("Vacant"),
            CommandEntry::Command(pending) => f
                .debug_struct("Command")
                .field("id", &pending.command.id)
                .field("aggregate_id", &pending.command.aggregate_id)
                .field("retries_left", &pending.retries_left)
                .finish(),
            CommandEntry::Recovery(id) => f.debug_tuple("Recovery").field(id).finish(),
        }
    }
}
