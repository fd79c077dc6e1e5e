//! Hierarchical path rules.

use std::any::Any;
use std::fmt;

use crate::{MultiRule, SchedulingRule};

/// A rule over a slash-separated resource path.
///
/// A path rule contains every rule for the same path or a descendant, and
/// conflicts with any rule for an ancestor or a descendant. `/p` therefore
/// blocks `/p/src/a.rs`, while `/p/src` and `/p/docs` may run side by side.
/// Empty segments are ignored, so `/a//b/` and `a/b` are the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathRule {
    segments: Vec<String>,
}

impl PathRule {
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Normalized path, always starting with `/`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// Number of path segments (`/` has depth 0).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns whether this path is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &PathRule) -> bool {
        other.segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl SchedulingRule for PathRule {
    fn contains(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(other) = rule.as_any().downcast_ref::<PathRule>() {
            return self.is_prefix_of(other);
        }
        if let Some(multi) = rule.as_any().downcast_ref::<MultiRule>() {
            return multi.children().iter().all(|child| self.contains(child.as_ref()));
        }
        false
    }

    fn is_conflicting(&self, rule: &dyn SchedulingRule) -> bool {
        if let Some(other) = rule.as_any().downcast_ref::<PathRule>() {
            return self.is_prefix_of(other) || other.is_prefix_of(self);
        }
        if let Some(multi) = rule.as_any().downcast_ref::<MultiRule>() {
            return multi.is_conflicting(self);
        }
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityRule;
    use proptest::prelude::*;

    #[test]
    fn test_normalization() {
        assert_eq!(PathRule::new("/a//b/").path(), "/a/b");
        assert_eq!(PathRule::new("a/b"), PathRule::new("/a/b"));
        assert_eq!(PathRule::new("/").depth(), 0);
        assert_eq!(PathRule::new("/a/b").to_string(), "/a/b");
    }

    #[test]
    fn test_ancestor_contains_descendant() {
        let project = PathRule::new("/p");
        let file = PathRule::new("/p/src/a.rs");

        assert!(project.contains(&file));
        assert!(!file.contains(&project));
        assert!(project.contains(&project));
    }

    #[test]
    fn test_conflicts() {
        let project = PathRule::new("/p");
        let src = PathRule::new("/p/src");
        let docs = PathRule::new("/p/docs");

        assert!(project.is_conflicting(&src));
        assert!(src.is_conflicting(&project));
        assert!(!src.is_conflicting(&docs));
        assert!(!PathRule::new("/pa").is_conflicting(&project));
    }

    #[test]
    fn test_unknown_rule_type() {
        let path = PathRule::new("/p");
        let other = IdentityRule::new();
        assert!(!path.is_conflicting(&other));
        assert!(!path.contains(&other));
    }

    fn path_strategy() -> impl Strategy<Value = PathRule> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..4)
            .prop_map(|segments| PathRule::new(&segments.join("/")))
    }

    proptest! {
        #[test]
        fn prop_conflict_is_symmetric(a in path_strategy(), b in path_strategy()) {
            prop_assert_eq!(a.is_conflicting(&b), b.is_conflicting(&a));
        }

        #[test]
        fn prop_containment_implies_conflict(a in path_strategy(), b in path_strategy()) {
            if a.contains(&b) {
                prop_assert!(a.is_conflicting(&b));
            }
        }

        #[test]
        fn prop_containment_is_transitive(
            a in path_strategy(),
            b in path_strategy(),
            c in path_strategy(),
        ) {
            if a.contains(&b) && b.contains(&c) {
                prop_assert!(a.contains(&c));
            }
        }
    }
}
