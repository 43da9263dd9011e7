//! Domain model (task records, identity keys, notification kinds).

pub mod events;
pub mod task;

pub use events::EventKind;
pub use task::{AbandonReason, TaskKey, TaskRecord};
