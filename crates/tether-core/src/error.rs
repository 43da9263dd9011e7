use thiserror::Error;

use crate::ports::StoreError;

/// Errors surfaced by the retry queue.
///
/// Exhaustion is not an error of the caller's operation; it is the
/// [`AbandonReason`](crate::domain::AbandonReason) attached to a `Fail` notification.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Missing or invalid option, caught when the queue is built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The task is no longer persisted (checked off, abandoned or cleared).
    #[error("task not found: name={name}")]
    NotFound { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
