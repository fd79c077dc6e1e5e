//! Observability hooks around blocking lock acquisition.

use std::thread::ThreadId;

/// Receives callbacks when threads block on, or release, managed resources.
///
/// Callbacks run on the thread doing the waiting or releasing, outside the
/// manager's internal lock. They must not acquire managed resources.
pub trait LockListener: Send + Sync {
    /// The calling thread is about to block. `owner` is one of the threads
    /// currently holding a conflicting resource.
    fn about_to_wait(&self, owner: Option<ThreadId>) {
        let _ = owner;
    }

    /// The calling thread is about to release a resource.
    fn about_to_release(&self) {}
}
