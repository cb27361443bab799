//! Event bus - publication of committed events.
//!
//! The command bus hands every successfully stored batch of events to an
//! [`EventBus`]. Publication happens on the publisher thread that owns the
//! aggregate, so a given aggregate's batches are published in commit order.
//!
//! ```text
//! ┌────────────────┐  append   ┌────────────┐
//! │ EventPublisher ├──────────▶│ EventStore │
//! │   (per shard)  │           └────────────┘
//! │                │  publish  ┌──────────────────────────────┐
//! │                ├──────────▶│ EventBus                     │
//! └────────────────┘           │  InMemoryEventBus (included) │
//!                              │  NoopEventBus (included)     │
//!                              └──────────────────────────────┘
//! ```

mod in_memory;
mod publisher;

pub use in_memory::InMemoryEventBus;
pub use publisher::{EventBus, NoopEventBus, PublishError};
