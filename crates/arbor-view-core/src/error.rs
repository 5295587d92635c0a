//! Error types for Arbor View core systems.

use std::fmt;

/// The main error type for core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Event-queue-related error.
    Queue(QueueError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(err) => write!(f, "Queue error: {err}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Queue(err) => Some(err),
        }
    }
}

/// Event-queue-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been closed and no longer accepts events.
    ///
    /// Background jobs that outlive the session observe this instead of
    /// silently enqueueing events nobody will drain.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Event queue is closed"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

/// A specialized Result type for Arbor View core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
