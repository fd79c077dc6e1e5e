//! Mutex-style rules.

use std::any::Any;

use crate::{same_rule, MultiRule, SchedulingRule};

/// A rule that conflicts with nothing but itself.
///
/// Jobs sharing one `IdentityRule` instance run strictly one at a time;
/// jobs with different instances never block each other.
#[derive(Debug, Default)]
pub struct IdentityRule {
    name: Option<String>,
}

impl IdentityRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rule with a name for diagnostics.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl SchedulingRule for IdentityRule {
    fn contains(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(multi) = rule.as_any().downcast_ref::<MultiRule>() {
            return multi.children().iter().all(|child| self.contains(child.as_ref()));
        }
        same_rule(self, rule)
    }

    fn is_conflicting(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(multi) = rule.as_any().downcast_ref::<MultiRule>() {
            return multi.is_conflicting(self);
        }
        same_rule(self, rule)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_only_with_itself() {
        let a = IdentityRule::named("a");
        let b = IdentityRule::named("a");

        assert!(a.is_conflicting(&a));
        assert!(a.contains(&a));
        assert!(!a.is_conflicting(&b));
        assert!(!a.contains(&b));
        assert_eq!(a.name(), Some("a"));
    }
}
