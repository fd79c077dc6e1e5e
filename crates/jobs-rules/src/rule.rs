//! The scheduling rule contract and the pairwise checks the scheduler uses.

use std::any::Any;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use crate::RuleError;

/// A predicate deciding whether two units of work may run concurrently.
///
/// Rules are immutable values. Implementations compare against other rule
/// types through [`as_any`](Self::as_any) and must return `false` for types
/// they do not recognize.
pub trait SchedulingRule: Send + Sync + fmt::Debug {
    /// Returns whether this rule covers everything `rule` covers.
    ///
    /// Reflexive and transitive.
    fn contains(&self, rule: &dyn SchedulingRule) -> bool;

    /// Returns whether this rule and `rule` must not run at the same time.
    ///
    /// Reflexive and symmetric. Only ever evaluated pairwise; conflicts are
    /// never inferred transitively.
    fn is_conflicting(&self, rule: &dyn SchedulingRule) -> bool;

    /// Concrete type access for cross-type comparisons.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a rule.
pub type RuleRef = Arc<dyn SchedulingRule>;

/// Returns whether `a` and `b` are the same rule instance.
pub fn same_rule(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    ptr::addr_eq(a, b)
}

/// Returns whether two shared rule handles point at the same instance.
pub fn rule_ptr_eq(a: &RuleRef, b: &RuleRef) -> bool {
    same_rule(a.as_ref(), b.as_ref())
}

/// Conflict check over optional rules.
///
/// An absent rule conflicts with nothing; an instance always conflicts with
/// itself, whatever its implementation says.
pub fn is_conflicting(a: Option<&dyn SchedulingRule>, b: Option<&dyn SchedulingRule>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_rule(a, b) || a.is_conflicting(b),
        _ => false,
    }
}

/// Containment check over optional rules.
///
/// Every rule (and the absence of a rule) contains the absent rule; the
/// absent rule contains nothing else.
pub fn contains(outer: Option<&dyn SchedulingRule>, inner: Option<&dyn SchedulingRule>) -> bool {
    match (outer, inner) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(outer), Some(inner)) => same_rule(outer, inner) || outer.contains(inner),
    }
}

/// Reject rules that break reflexivity.
///
/// # Errors
///
/// Returns `RuleError::NotReflexive` if the rule does not conflict with or
/// does not contain itself.
pub fn validate_rule(rule: &dyn SchedulingRule) -> Result<(), RuleError> {
    if rule.is_conflicting(rule) && rule.contains(rule) {
        Ok(())
    } else {
        Err(RuleError::NotReflexive(format!("{:?}", rule)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityRule, PathRule};

    #[derive(Debug)]
    struct NeverRule;

    impl SchedulingRule for NeverRule {
        fn contains(&self, _rule: &dyn SchedulingRule) -> bool {
            false
        }

        fn is_conflicting(&self, _rule: &dyn SchedulingRule) -> bool {
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_same_rule_identity() {
        let a: RuleRef = Arc::new(IdentityRule::new());
        let b: RuleRef = Arc::new(IdentityRule::new());
        let a2 = a.clone();

        assert!(rule_ptr_eq(&a, &a2));
        assert!(!rule_ptr_eq(&a, &b));
    }

    #[test]
    fn test_absent_rules_never_conflict() {
        let a = PathRule::new("/a");
        assert!(!is_conflicting(None, None));
        assert!(!is_conflicting(Some(&a), None));
        assert!(!is_conflicting(None, Some(&a)));
    }

    #[test]
    fn test_instance_conflicts_with_itself() {
        let never = NeverRule;
        assert!(is_conflicting(Some(&never), Some(&never)));
        assert!(contains(Some(&never), Some(&never)));
    }

    #[test]
    fn test_contains_absent() {
        let a = PathRule::new("/a");
        assert!(contains(None, None));
        assert!(contains(Some(&a), None));
        assert!(!contains(None, Some(&a)));
    }

    #[test]
    fn test_validate_rule() {
        assert!(validate_rule(&PathRule::new("/a")).is_ok());
        assert!(validate_rule(&IdentityRule::new()).is_ok());
        assert!(matches!(
            validate_rule(&NeverRule),
            Err(RuleError::NotReflexive(_))
        ));
    }
}
