mod domain_event;
#[allow(clippy::module_inception)]
mod entity;

pub use domain_event::{DomainEvent, PayloadError};
pub(crate) use domain_event::CAUSATION_ID;
pub use entity::Entity;
