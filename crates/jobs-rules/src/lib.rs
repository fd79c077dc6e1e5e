//! Scheduling rules for the cooperative job scheduler.
//!
//! A scheduling rule is a predicate object a job carries to tell the
//! scheduler which other jobs it must not run alongside. The scheduler knows
//! nothing about what a rule protects (a file, a project, a connection); it
//! only asks two questions of a pair of rules:
//!
//! - `is_conflicting`: may these two run at the same time? Must be
//!   reflexive and symmetric.
//! - `contains`: does the first cover everything the second does? Must be
//!   reflexive and transitive. A thread holding a rule may begin any rule it
//!   contains without further locking.
//!
//! # Provided Rules
//!
//! - [`PathRule`]: a hierarchical path; conflicts with ancestors and descendants
//! - [`IdentityRule`]: a mutex; conflicts only with itself
//! - [`MultiRule`]: the union of several rules

mod error;
mod identity;
mod multi;
mod path;
mod rule;

pub use error::RuleError;
pub use identity::IdentityRule;
pub use multi::MultiRule;
pub use path::PathRule;
pub use rule::{contains, is_conflicting, rule_ptr_eq, same_rule, validate_rule, RuleRef, SchedulingRule};
