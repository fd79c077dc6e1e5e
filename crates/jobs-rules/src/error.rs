//! Error types for the rules crate.

use thiserror::Error;

/// Errors raised when a rule breaks its contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Rule does not conflict with, or does not contain, itself
    #[error("Scheduling rule is not reflexive: {0}")]
    NotReflexive(String),
}
