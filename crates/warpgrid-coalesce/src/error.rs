//! Error types for the coalescing client.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for coalescing client operations.
pub type CoalesceResult<T> = Result<T, CoalesceError>;

/// Errors surfaced to callers of the coalescing client.
///
/// Cloneable so a single fetch failure can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum CoalesceError {
    /// The request executor failed. Every waiter on the same key sees the
    /// same error.
    #[error("request failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),

    /// This caller's deadline passed before the item resolved. The item
    /// itself stays pending for other waiters.
    #[error("timed out after {0:?} waiting for a response")]
    DeadlineExceeded(Duration),

    #[error("pushed response has no originating request")]
    MissingRequest,

    #[error("invalid request uri: {0}")]
    InvalidUri(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CoalesceError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CoalesceError::DeadlineExceeded(_))
    }
}

impl From<anyhow::Error> for CoalesceError {
    fn from(err: anyhow::Error) -> Self {
        CoalesceError::Fetch(Arc::new(err))
    }
}
