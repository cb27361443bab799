mod in_memory;
mod snapshottable;
mod store;

pub use in_memory::InMemorySnapshotStore;
pub use snapshottable::Snapshottable;
pub use store::{SnapshotRecord, SnapshotStore};
