use serde::Deserialize;
use thiserror::Error;

use crate::command::RollbackPolicy;
use crate::ring::{ProducerType, WaitStrategy};

/// Invalid command bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("buffer size must be a power of two, got {0}")]
    BufferSize(usize),
    #[error("{0} thread count must be at least 1")]
    ThreadCount(&'static str),
    #[error("invalid configuration: {0}")]
    Parse(String),
}

/// Settings of a command bus, fixed for its lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Ring capacity; must be a power of two.
    pub buffer_size: usize,
    pub producer_type: ProducerType,
    pub wait_strategy: WaitStrategy,
    pub invoker_threads: usize,
    pub publisher_threads: usize,
    pub rollback_policy: RollbackPolicy,
    /// Events between snapshots; 0 disables snapshotting.
    pub snapshot_threshold: u64,
    /// Reload-and-retry attempts before a conflict reaches the callback.
    pub conflict_retries: u32,
    /// Re-dispatch commands computed on state a failed commit invalidated,
    /// instead of failing them.
    pub reschedule_on_corrupt_state: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            producer_type: ProducerType::Multi,
            wait_strategy: WaitStrategy::Blocking,
            invoker_threads: 1,
            publisher_threads: 1,
            rollback_policy: RollbackPolicy::Selective,
            snapshot_threshold: 0,
            conflict_retries: 2,
            reschedule_on_corrupt_state: true,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_producer_type(mut self, producer_type: ProducerType) -> Self {
        self.producer_type = producer_type;
        self
    }

    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }

    pub fn with_invoker_threads(mut self, count: usize) -> Self {
        self.invoker_threads = count;
        self
    }

    pub fn with_publisher_threads(mut self, count: usize) -> Self {
        self.publisher_threads = count;
        self
    }

    pub fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback_policy = policy;
        self
    }

    pub fn with_snapshot_threshold(mut self, threshold: u64) -> Self {
        self.snapshot_threshold = threshold;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_reschedule_on_corrupt_state(mut self, reschedule: bool) -> Self {
        self.reschedule_on_corrupt_state = reschedule;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }
        if self.invoker_threads == 0 {
            return Err(ConfigError::ThreadCount("invoker"));
        }
        if self.publisher_threads == 0 {
            return Err(ConfigError::ThreadCount("publisher"));
        }
        Ok(())
    }
}
