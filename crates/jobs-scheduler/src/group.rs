//! Groups of jobs that share a concurrency limit.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

struct GroupInner {
    id: u64,
    name: String,
    max_threads: usize,
}

/// A set of jobs that may run on at most `max_threads` workers at once.
///
/// A limit of 0 means unlimited. Members of a throttled group stay queued
/// while the group is at its limit; jobs queued behind them are dispatched
/// as usual unless their rules conflict.
///
/// `JobGroup` is a cheap handle; clones refer to the same group.
#[derive(Clone)]
pub struct JobGroup {
    inner: Arc<GroupInner>,
}

impl JobGroup {
    pub fn new(name: impl Into<String>, max_threads: usize) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                max_threads,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Returns whether the group limits how many members run at once.
    pub fn is_throttled(&self) -> bool {
        self.inner.max_threads > 0
    }

    /// Returns whether one more member may start while `running` are running.
    pub(crate) fn has_room(&self, running: usize) -> bool {
        !self.is_throttled() || running < self.inner.max_threads
    }
}

impl PartialEq for JobGroup {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for JobGroup {}

impl Hash for JobGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGroup")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("max_threads", &self.inner.max_threads)
            .finish()
    }
}

impl fmt::Display for JobGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id)
    }
}
