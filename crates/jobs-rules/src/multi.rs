//! Union of several rules.

use std::any::Any;
use std::sync::Arc;

use crate::rule::{contains, is_conflicting};
use crate::{RuleRef, SchedulingRule};

/// A rule that holds several child rules at once.
///
/// Conflicts with anything one of its children conflicts with and contains
/// anything one of its children contains. Nested multi rules are flattened
/// on construction so children are never themselves `MultiRule`s.
#[derive(Debug, Clone)]
pub struct MultiRule {
    children: Vec<RuleRef>,
}

impl MultiRule {
    pub fn new(rules: impl IntoIterator<Item = RuleRef>) -> Self {
        let mut children = Vec::new();
        for rule in rules {
            match rule.as_any().downcast_ref::<MultiRule>() {
                Some(multi) => children.extend(multi.children.iter().cloned()),
                None => children.push(rule),
            }
        }
        Self { children }
    }

    /// Combine two optional rules into the smallest rule covering both.
    ///
    /// Returns the other rule when one is absent, the outer rule when one
    /// contains the other, and a new `MultiRule` otherwise.
    pub fn combine(a: Option<RuleRef>, b: Option<RuleRef>) -> Option<RuleRef> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                if contains(Some(a.as_ref()), Some(b.as_ref())) {
                    Some(a)
                } else if contains(Some(b.as_ref()), Some(a.as_ref())) {
                    Some(b)
                } else {
                    Some(Arc::new(MultiRule::new([a, b])))
                }
            }
        }
    }

    pub fn children(&self) -> &[RuleRef] {
        &self.children
    }
}

impl SchedulingRule for MultiRule {
    fn contains(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(other) = rule.as_any().downcast_ref::<MultiRule>() {
            return other
                .children
                .iter()
                .all(|inner| self.contains(inner.as_ref()));
        }
        self.children
            .iter()
            .any(|child| contains(Some(child.as_ref()), Some(rule)))
    }

    fn is_conflicting(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(other) = rule.as_any().downcast_ref::<MultiRule>() {
            return other
                .children
                .iter()
                .any(|inner| self.is_conflicting(inner.as_ref()));
        }
        self.children
            .iter()
            .any(|child| is_conflicting(Some(child.as_ref()), Some(rule)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
