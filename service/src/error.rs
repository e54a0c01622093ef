use thiserror::Error;

use crate::chain::ChainError;
use crate::storage::StorageError;

/// Top-level error for the service crate, composed from the two subsystem
/// errors that can actually surface out of the event loop.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitoringError {
    /// Whether the event loop should abort rather than retry next cycle.
    /// Every `StorageError` variant here means the embedded store is
    /// corrupt, full, or missing its persisted state — none of that heals
    /// itself on the next tick. Chain-adapter errors (RPC hiccups, a
    /// dropped connection) are presumed transient and left to retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitoringError::Storage(_))
    }
}
