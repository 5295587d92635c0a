//! Error types for tree synchronization.

use thiserror::Error;

use crate::domain::DomainKey;

/// Errors surfaced by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The rebuild root addresses an object of the wrong kind.
    #[error("domain object {0:?} is not an environment")]
    NotAnEnvironment(DomainKey),

    /// The addressed object is not in the store at all.
    #[error("domain object {0:?} is missing from the store")]
    MissingObject(DomainKey),
}

/// Convenience result alias for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;
