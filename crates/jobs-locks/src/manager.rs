//! The lock manager: blocking acquisition with deadlock avoidance.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::graph::{Resolution, WaitGraph};
use crate::{LockError, LockId, LockListener, OrderedLock, Resource};

/// Default interval at which a blocked thread polls its cancellation probe.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a call to [`LockManager::acquire_with`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    TimedOut,
    Canceled,
}

impl AcquireOutcome {
    pub fn is_acquired(self) -> bool {
        self == AcquireOutcome::Acquired
    }
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Successful acquisitions, reentrant ones included.
    pub acquisitions: u64,
    /// Acquisitions that had to block.
    pub waits: u64,
    /// Wait cycles broken by a forced transfer down.
    pub deadlocks_resolved: u64,
}

struct LockState {
    graph: WaitGraph,
    next_lock_id: u64,
    stats: LockStats,
}

type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

/// Serializes access to explicit locks and scheduling rules across threads.
///
/// Resources are held on behalf of the calling OS thread and are reentrant:
/// acquiring something the thread already holds only bumps a depth counter,
/// and a thread never blocks on its own holdings.
///
/// Before a thread blocks, the manager checks whether its wait would close a
/// cycle in the wait-for graph. If so, a thread on the cycle is forced to
/// give up the explicit locks its predecessor waits for, along with the
/// locks it acquired after them. Another thread is chosen when possible,
/// otherwise the requester itself. The victim gets its locks back, in
/// order, before its own pending acquisition returns. Scheduling rules are
/// never taken away, so a cycle made only of rules stays blocked and is
/// reported as an error.
///
/// Among waiters whose wants conflict, the one with the lowest priority
/// value is served first, and the one that started waiting first among
/// equal priorities. See [`LockManager::set_thread_priority`].
pub struct LockManager {
    state: Mutex<LockState>,
    wakeup: Condvar,
    listeners: RwLock<Vec<Arc<dyn LockListener>>>,
    release_hook: RwLock<Option<ReleaseHook>>,
    poll_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Create a manager whose blocked threads check their cancellation probe
    /// every `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LockState {
                graph: WaitGraph::default(),
                next_lock_id: 1,
                stats: LockStats::default(),
            }),
            wakeup: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            release_hook: RwLock::new(None),
            poll_interval,
        }
    }

    /// Create a new explicit, reentrant lock managed by this manager.
    pub fn new_lock(self: &Arc<Self>) -> OrderedLock {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_lock_id;
            state.next_lock_id += 1;
            LockId(id)
        };
        OrderedLock::new(id, self.clone())
    }

    pub fn add_listener(&self, listener: Arc<dyn LockListener>) {
        self.listeners.write().push(listener);
    }

    /// Install a callback run after any resource is fully released.
    ///
    /// The hook runs on the releasing thread with no manager lock held.
    pub fn set_release_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.release_hook.write() = Some(Arc::new(hook));
    }

    /// Block until the calling thread holds `resource`.
    pub fn acquire(&self, resource: Resource) {
        self.acquire_with(resource, None, None);
    }

    /// Take `resource` only if that is possible without blocking.
    pub fn try_acquire(&self, resource: Resource) -> bool {
        self.acquire_with(resource, Some(Duration::ZERO), None)
            .is_acquired()
    }

    /// Acquire `resource` for the calling thread.
    ///
    /// Gives up once `timeout` has elapsed, or once `cancel` returns `true`.
    /// The probe is checked before blocking and then every poll interval.
    /// A thread that lost holdings to a forced transfer down always gets
    /// them back before this returns, whatever the outcome.
    pub fn acquire_with(
        &self,
        resource: Resource,
        timeout: Option<Duration>,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> AcquireOutcome {
        let me = thread::current().id();
        if cancel.is_some_and(|probe| probe()) {
            return AcquireOutcome::Canceled;
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        // Declared before the state guard so it is dropped after it.
        let mut registration = WaitRegistration {
            manager: self,
            thread: me,
            armed: false,
        };
        let mut state = self.state.lock();

        if state.graph.depth_of(me, &resource) > 0 || state.graph.can_grant_now(me, &resource) {
            state.graph.add_holding(me, resource);
            state.stats.acquisitions += 1;
            return AcquireOutcome::Acquired;
        }
        if timeout.is_some_and(|t| t.is_zero()) {
            return AcquireOutcome::TimedOut;
        }

        state.stats.waits += 1;
        state.graph.begin_wait(me, resource.clone());
        registration.armed = true;
        let owner = state.graph.blockers(me).first().copied();
        debug!(resource = %resource, owner = ?owner, "Waiting for resource");
        self.notify_about_to_wait(&mut state, owner);

        let mut outcome = AcquireOutcome::Acquired;
        let mut reported_stuck = false;
        loop {
            loop {
                match state.graph.resolve_deadlock(me) {
                    Resolution::Transferred(transfer) => {
                        state.stats.deadlocks_resolved += 1;
                        warn!(
                            resource = %resource,
                            victim = ?transfer.victim,
                            suspended = transfer.suspended,
                            "Deadlock avoided by forcing a transfer down"
                        );
                        self.wakeup.notify_all();
                    }
                    Resolution::Stuck(cycle) => {
                        if !reported_stuck {
                            reported_stuck = true;
                            error!(
                                resource = %resource,
                                cycle = ?cycle,
                                "Wait cycle holds only scheduling rules and cannot be broken"
                            );
                        }
                        break;
                    }
                    Resolution::NoCycle => break,
                }
            }

            if state.graph.can_grant(me) {
                state.graph.grant(me);
                if outcome.is_acquired() {
                    state.stats.acquisitions += 1;
                }
                break;
            }

            let still_wanted = outcome.is_acquired();
            if still_wanted {
                let canceled = match cancel {
                    Some(probe) => MutexGuard::unlocked(&mut state, probe),
                    None => false,
                };
                let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
                if canceled || timed_out {
                    outcome = if canceled {
                        AcquireOutcome::Canceled
                    } else {
                        AcquireOutcome::TimedOut
                    };
                    debug!(resource = %resource, outcome = ?outcome, "Gave up waiting for resource");
                    let keep_waiting = state.graph.abandon_wanted(me);
                    self.wakeup.notify_all();
                    if !keep_waiting {
                        registration.armed = false;
                        return outcome;
                    }
                    continue;
                }
            }

            let poll = cancel
                .filter(|_| still_wanted)
                .map(|_| Instant::now() + self.poll_interval);
            let deadline = deadline.filter(|_| still_wanted);
            let wake_at = match (deadline, poll) {
                (Some(d), Some(p)) => Some(d.min(p)),
                (d, p) => d.or(p),
            };
            match wake_at {
                Some(at) => {
                    self.wakeup.wait_until(&mut state, at);
                }
                None => self.wakeup.wait(&mut state),
            }
        }

        registration.armed = false;
        drop(state);
        self.wakeup.notify_all();
        trace!(resource = %resource, "Acquired resource after waiting");
        outcome
    }

    /// Release one level of `resource` held by the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `LockError::NotOwner` if the calling thread does not hold it.
    pub fn release(&self, resource: &Resource) -> Result<(), LockError> {
        let me = thread::current().id();
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.about_to_release();
        }

        let released = self.state.lock().graph.release(me, resource)?;
        if released {
            self.wakeup.notify_all();
            trace!(resource = %resource, "Released resource");
            let hook = self.release_hook.read().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
        Ok(())
    }

    /// Rank future waits of `thread` with `priority`; lower values are served
    /// first. `None` clears it, and threads without one rank as 0.
    pub fn set_thread_priority(&self, thread: ThreadId, priority: Option<u32>) {
        self.state.lock().graph.set_priority(thread, priority);
    }

    /// Returns whether another thread is waiting for something `thread` holds.
    pub fn is_blocking(&self, thread: ThreadId) -> bool {
        self.state.lock().graph.is_blocking(thread)
    }

    /// Returns whether the calling thread holds any explicit lock.
    pub fn is_lock_owner(&self) -> bool {
        self.state.lock().graph.holds_lock(thread::current().id())
    }

    /// Resources held by the calling thread, in acquisition order.
    pub fn holdings(&self) -> Vec<Resource> {
        self.state.lock().graph.holdings(thread::current().id())
    }

    /// Reentrant depth at which the calling thread holds `resource`.
    pub fn depth(&self, resource: &Resource) -> usize {
        self.state
            .lock()
            .graph
            .depth_of(thread::current().id(), resource)
    }

    /// Returns whether no thread holds or waits for anything.
    pub fn is_empty(&self) -> bool {
        self.state.lock().graph.is_empty()
    }

    pub fn stats(&self) -> LockStats {
        self.state.lock().stats
    }

    fn notify_about_to_wait(&self, state: &mut MutexGuard<'_, LockState>, owner: Option<ThreadId>) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        MutexGuard::unlocked(state, || {
            for listener in &listeners {
                listener.about_to_wait(owner);
            }
        });
    }
}

/// Removes a thread's wait edges if it unwinds while blocked.
struct WaitRegistration<'a> {
    manager: &'a LockManager,
    thread: ThreadId,
    armed: bool,
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let lost = self.manager.state.lock().graph.abandon(self.thread);
        self.manager.wakeup.notify_all();
        if lost > 0 {
            error!(
                thread = ?self.thread,
                lost,
                "Discarded suspended holdings of a thread unwinding while blocked"
            );
        }
    }
}
