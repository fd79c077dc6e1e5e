//! Error types for the lock manager.

use thiserror::Error;

/// Errors returned by lock manager operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// Calling thread tried to release a resource it does not hold
    #[error("Thread does not own resource: {0}")]
    NotOwner(String),
}
