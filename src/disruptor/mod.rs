//! The command bus pipeline.
//!
//! ```text
//! dispatch ──► RingBuffer<CommandEntry>
//!                  │
//!                  ├──► invoker 0 ─┐   run handlers, shard = route % invokers
//!                  ├──► invoker 1 ─┤
//!                  │               ▼
//!                  ├──► publisher 0    append, publish, complete callbacks,
//!                  └──► publisher 1    shard = route % publishers
//!                            │
//!                            └──► rescheduler ──► RingBuffer (recoveries, retries)
//! ```
//!
//! Every stage reads every slot in order and skips slots routed to another
//! shard, so commands for one aggregate are always invoked and committed in
//! the order they were accepted.

mod command_bus;
mod config;
pub(crate) mod entry;
mod invoker;
mod metrics;
pub(crate) mod pipeline;
mod publisher;
mod rescheduler;

pub use command_bus::CommandBus;
pub use config::{BusConfig, ConfigError};
pub use metrics::BusStats;
