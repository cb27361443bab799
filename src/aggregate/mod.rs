#[allow(clippy::module_inception)]
mod aggregate;

pub use aggregate::{hydrate, Aggregate};
