use serde::{de::DeserializeOwned, Serialize};

use crate::aggregate::Aggregate;

/// Opt-in trait for aggregates that support snapshot-based reconstruction.
///
/// The associated `Snapshot` type is a separate struct capturing the aggregate's
/// state; it is stored bitcode-encoded in a [`SnapshotRecord`](super::SnapshotRecord).
pub trait Snapshottable: Aggregate {
    type Snapshot: Serialize + DeserializeOwned;

    /// Create a snapshot of the current aggregate state.
    fn create_snapshot(&self) -> Self::Snapshot;

    /// Restore aggregate state from a snapshot.
    fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot);
}
