//! Terminal states and error types for fan-out streams.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by fork reads once a stream has terminated abnormally.
///
/// Natural end-of-stream is not an error: reads return `Ok(0)`.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Every fork was closed before the upstream reached its end.
    #[error("stream cancelled: all readers closed before the upstream finished")]
    Cancelled,

    /// The upstream reader failed. The same error is reported to every fork.
    #[error("upstream read failed: {0}")]
    Upstream(#[source] Arc<io::Error>),
}

impl StreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Upstream(Arc::new(err))
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err),
            StreamError::Upstream(inner) => {
                io::Error::new(inner.kind(), StreamError::Upstream(inner))
            }
        }
    }
}

/// The write-once final state of a multiplexed stream.
#[derive(Debug, Clone)]
pub enum Termination {
    /// The upstream reported end-of-stream.
    Eof,
    /// The last fork closed before the upstream finished.
    Cancelled,
    /// The upstream failed.
    Failed(Arc<io::Error>),
}

impl Termination {
    /// What a fork read reports once its cursor has drained the buffer.
    pub fn read_result(&self) -> Result<usize, StreamError> {
        match self {
            Termination::Eof => Ok(0),
            Termination::Cancelled => Err(StreamError::Cancelled),
            Termination::Failed(err) => Err(StreamError::Upstream(Arc::clone(err))),
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Termination::Eof)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Eof => write!(f, "eof"),
            Termination::Cancelled => write!(f, "cancelled"),
            Termination::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}
