//! Explicit reentrant locks.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::{LockError, LockId, LockManager, Resource};

/// A reentrant lock whose waits take part in the manager's deadlock
/// avoidance.
///
/// A thread blocked in [`acquire`](Self::acquire) may briefly lose locks it
/// acquired after the contended one if that is what breaks a wait cycle; it
/// always holds them again by the time `acquire` returns.
pub struct OrderedLock {
    id: LockId,
    manager: Arc<LockManager>,
}

impl OrderedLock {
    pub(crate) fn new(id: LockId, manager: Arc<LockManager>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    fn resource(&self) -> Resource {
        Resource::Lock(self.id)
    }

    /// Block until the calling thread holds this lock.
    pub fn acquire(&self) {
        self.manager.acquire(self.resource());
    }

    /// Try for at most `timeout`. Returns whether the lock was acquired.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.manager
            .acquire_with(self.resource(), Some(timeout), None)
            .is_acquired()
    }

    /// Release one level of this lock.
    ///
    /// # Errors
    ///
    /// Returns `LockError::NotOwner` if the calling thread does not hold it.
    pub fn release(&self) -> Result<(), LockError> {
        self.manager.release(&self.resource())
    }

    /// Number of times the calling thread currently holds this lock.
    pub fn depth(&self) -> usize {
        self.manager.depth(&self.resource())
    }

    /// Acquire the lock and release it when the guard is dropped.
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for OrderedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedLock").field("id", &self.id).finish()
    }
}

/// RAII guard returned by [`OrderedLock::lock`].
///
/// Holdings belong to a thread, so the guard cannot leave it.
pub struct LockGuard<'a> {
    lock: &'a OrderedLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!(lock = %self.lock.id, error = %e, "Failed to release lock on guard drop");
        }
    }
}
