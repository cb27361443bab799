//! Fixed-capacity ring buffer with sequence-based coordination.
//!
//! Producers claim sequences and publish slots; consumer threads track their
//! progress in [`Sequence`]s and wait on [`SequenceBarrier`]s for the stage
//! in front of them. Producers are gated by the last stage so a slot is never
//! reused before every consumer has passed it.
//!
//! ```text
//!  producers ──claim/publish──▶ [ ring ] ──▶ invokers ──▶ publishers
//!      ▲                                                      │
//!      └──────────────── gating sequences ◀───────────────────┘
//! ```

mod ring_buffer;
mod sequence;
mod wait_strategy;

pub use ring_buffer::{ProducerType, RingBuffer};
pub use sequence::{Alerted, Sequence, SequenceBarrier};
pub use wait_strategy::{WaitStrategy, Waiter};
