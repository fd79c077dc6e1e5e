//! The things a thread can hold through the lock manager.

use std::fmt;

use jobs_rules::{is_conflicting, rule_ptr_eq, RuleRef};

/// Identifier of an explicit lock created by a lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub(crate) u64);

impl LockId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// An explicit lock or a scheduling rule.
///
/// Locks conflict only with themselves. Rules conflict according to
/// [`SchedulingRule::is_conflicting`](jobs_rules::SchedulingRule::is_conflicting).
/// A lock never conflicts with a rule.
#[derive(Debug, Clone)]
pub enum Resource {
    Lock(LockId),
    Rule(RuleRef),
}

impl Resource {
    /// Returns whether two threads may not hold `self` and `other` at once.
    pub fn conflicts_with(&self, other: &Resource) -> bool {
        match (self, other) {
            (Resource::Lock(a), Resource::Lock(b)) => a == b,
            (Resource::Rule(a), Resource::Rule(b)) => {
                is_conflicting(Some(a.as_ref()), Some(b.as_ref()))
            }
            _ => false,
        }
    }

    /// Returns whether `self` and `other` are the same lock or rule instance.
    pub fn same(&self, other: &Resource) -> bool {
        match (self, other) {
            (Resource::Lock(a), Resource::Lock(b)) => a == b,
            (Resource::Rule(a), Resource::Rule(b)) => rule_ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, Resource::Lock(_))
    }
}

impl From<RuleRef> for Resource {
    fn from(rule: RuleRef) -> Self {
        Resource::Rule(rule)
    }
}

impl From<LockId> for Resource {
    fn from(id: LockId) -> Self {
        Resource::Lock(id)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Lock(id) => write!(f, "{}", id),
            Resource::Rule(rule) => write!(f, "{:?}", rule),
        }
    }
}
