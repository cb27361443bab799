use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entity::PayloadError;

use super::CommandError;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// A request to perform one action on one aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub id: String,
    pub command_name: String,
    pub aggregate_id: String,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl Command {
    pub fn new(
        command_name: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Command {
            id: format!("cmd-{}", NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed)),
            command_name: command_name.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Build a command with a bitcode-encoded payload.
    pub fn encode<T: Serialize>(
        command_name: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, PayloadError> {
        let bytes = bitcode::serialize(payload).map_err(|e| PayloadError {
            message: e.to_string(),
        })?;
        Ok(Self::new(command_name, aggregate_id, bytes))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        bitcode::deserialize(&self.payload).map_err(|e| PayloadError {
            message: e.to_string(),
        })
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A failed command together with the reason.
#[derive(Debug, Error)]
#[error("command {} ({}) failed: {error}", .command.id, .command.command_name)]
pub struct CommandFailure {
    pub command: Command,
    pub error: CommandError,
}

/// The single outcome delivered for a dispatched command.
pub type CommandOutcome = Result<Value, CommandFailure>;

/// Continuation invoked exactly once with a command's outcome.
pub type CommandCallback = Box<dyn FnOnce(CommandOutcome) + Send + 'static>;

/// Receiving end of a command's outcome, returned by `CommandBus::send`.
pub struct Completion {
    command: Command,
    receiver: mpsc::Receiver<CommandOutcome>,
}

impl Completion {
    pub(crate) fn channel(command: &Command) -> (CommandCallback, Completion) {
        let (sender, receiver) = mpsc::channel();
        let callback: CommandCallback = Box::new(move |outcome| {
            // The caller may have dropped its Completion; nobody is listening then.
            let _ = sender.send(outcome);
        });
        let completion = Completion {
            command: command.clone(),
            receiver,
        };
        (callback, completion)
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Block until the command completes.
    pub fn wait(self) -> CommandOutcome {
        match self.receiver.recv() {
            Ok(outcome) => outcome,
            Err(mpsc::RecvError) => Err(self.halted()),
        }
    }

    /// Block until the command completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(self.halted())),
        }
    }

    /// The outcome, if the command already completed.
    pub fn try_result(&self) -> Option<CommandOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(self.halted())),
        }
    }

    fn halted(&self) -> CommandFailure {
        CommandFailure {
            command: self.command.clone(),
            error: CommandError::Halted,
        }
    }
}
