use std::io;

use thiserror::Error;

/// Errors produced by transport streams, codecs, and pipes.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Malformed framing: bad length, missing delimiter.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Stream ended in the middle of a frame.
    #[error("truncated stream: {0}")]
    TruncatedStream(&'static str),
    /// Scheduling contract broken: an operation resumed off its owning
    /// context. Fatal; must not be caught and retried.
    #[error("affinity violation: resumed off the owning context")]
    AffinityViolation,
    /// Write attempted after the pipe was closed.
    #[error("pipe closed")]
    PipeClosed,
    /// I/O error from an underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// True for errors that must abort the whole operation chain rather
    /// than surface at a filter boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::AffinityViolation)
    }
}

/// Error returned by [`ConfigBuilder::build`](crate::ConfigBuilder::build)
/// when a configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid config: {0}")]
pub struct InvalidConfig(pub String);
