//! Wait-for graph between threads and the resources they hold or want.
//!
//! Every thread that holds or waits for something has an entry. A thread
//! waiting for resources has an edge to every other thread holding a
//! conflicting resource. Before a thread blocks, [`WaitGraph::resolve_deadlock`]
//! looks for a cycle through it and breaks the cycle by suspending the
//! explicit locks of a thread on it ("transfer down"). Scheduling rules are
//! never taken away from their holder.

use std::collections::{HashMap, HashSet};
use std::thread::ThreadId;

use tracing::debug;

use crate::{LockError, Resource};

#[derive(Debug, Clone)]
pub(crate) struct Holding {
    pub resource: Resource,
    pub depth: usize,
}

#[derive(Debug)]
pub(crate) struct Waiting {
    /// Resource being acquired; `None` once the acquisition timed out or was
    /// canceled and the thread only waits to get its suspended holdings back.
    pub wanted: Option<Resource>,
    pub priority: u32,
    pub ticket: u64,
}

impl Waiting {
    /// Position among waiters: lower priority values first, then arrival.
    fn rank(&self) -> (u32, u64) {
        (self.priority, self.ticket)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ThreadEntry {
    /// Holdings in acquisition order.
    pub held: Vec<Holding>,
    /// Holdings taken away by a forced transfer down, in acquisition order.
    pub suspended: Vec<Holding>,
    pub waiting: Option<Waiting>,
}

impl ThreadEntry {
    fn is_idle(&self) -> bool {
        self.held.is_empty() && self.suspended.is_empty() && self.waiting.is_none()
    }
}

/// Result of a forced transfer down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferDown {
    pub victim: ThreadId,
    pub suspended: usize,
}

/// Outcome of [`WaitGraph::resolve_deadlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    NoCycle,
    Transferred(TransferDown),
    /// A cycle no thread on it can leave by giving up explicit locks.
    Stuck(Vec<ThreadId>),
}

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    threads: HashMap<ThreadId, ThreadEntry>,
    priorities: HashMap<ThreadId, u32>,
    next_ticket: u64,
}

impl WaitGraph {
    pub fn is_empty(&self) -> bool {
        self.threads.values().all(ThreadEntry::is_idle)
    }

    pub fn depth_of(&self, thread: ThreadId, resource: &Resource) -> usize {
        self.threads
            .get(&thread)
            .and_then(|entry| entry.held.iter().find(|h| h.resource.same(resource)))
            .map(|h| h.depth)
            .unwrap_or(0)
    }

    pub fn holdings(&self, thread: ThreadId) -> Vec<Resource> {
        self.threads
            .get(&thread)
            .map(|entry| entry.held.iter().map(|h| h.resource.clone()).collect())
            .unwrap_or_default()
    }

    /// Set the priority future waits of `thread` are ranked with, or reset
    /// it to 0 with `None`.
    pub fn set_priority(&mut self, thread: ThreadId, priority: Option<u32>) {
        match priority {
            Some(priority) => {
                self.priorities.insert(thread, priority);
            }
            None => {
                self.priorities.remove(&thread);
            }
        }
    }

    pub fn holds_lock(&self, thread: ThreadId) -> bool {
        self.threads
            .get(&thread)
            .is_some_and(|entry| entry.held.iter().any(|h| h.resource.is_lock()))
    }

    /// Everything `thread` is waiting for: its wanted resource plus any
    /// holdings suspended by a transfer down.
    fn wants(&self, thread: ThreadId) -> Vec<&Resource> {
        let Some(entry) = self.threads.get(&thread) else {
            return Vec::new();
        };
        let Some(waiting) = &entry.waiting else {
            return Vec::new();
        };
        waiting
            .wanted
            .iter()
            .chain(entry.suspended.iter().map(|h| &h.resource))
            .collect()
    }

    /// Threads other than `thread` holding something that conflicts with `wants`.
    fn holders_conflicting(&self, thread: ThreadId, wants: &[&Resource]) -> Vec<ThreadId> {
        self.threads
            .iter()
            .filter(|(id, _)| **id != thread)
            .filter(|(_, entry)| {
                entry
                    .held
                    .iter()
                    .any(|h| wants.iter().any(|w| w.conflicts_with(&h.resource)))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Threads `thread` is currently waiting on.
    pub fn blockers(&self, thread: ThreadId) -> Vec<ThreadId> {
        let wants = self.wants(thread);
        if wants.is_empty() {
            return Vec::new();
        }
        self.holders_conflicting(thread, &wants)
    }

    /// Returns whether some waiting thread is blocked by a holding of `thread`.
    pub fn is_blocking(&self, thread: ThreadId) -> bool {
        self.threads
            .iter()
            .filter(|(id, entry)| **id != thread && entry.waiting.is_some())
            .any(|(id, _)| self.blockers(*id).contains(&thread))
    }

    /// Returns whether `thread` could take `resource` right now without
    /// overtaking a thread that is already waiting for a conflicting resource.
    pub fn can_grant_now(&self, thread: ThreadId, resource: &Resource) -> bool {
        if !self.holders_conflicting(thread, &[resource]).is_empty() {
            return false;
        }
        !self.threads.iter().any(|(id, entry)| {
            *id != thread
                && entry.waiting.is_some()
                && self.blockers(*id).is_empty()
                && self.wants(*id).iter().any(|w| w.conflicts_with(resource))
        })
    }

    /// Returns whether the waiting `thread` can be granted everything it
    /// wants. Among unblocked waiters whose wants conflict, the one with the
    /// lowest priority value wins, and the earliest ticket among equals.
    pub fn can_grant(&self, thread: ThreadId) -> bool {
        let Some(rank) = self
            .threads
            .get(&thread)
            .and_then(|entry| entry.waiting.as_ref())
            .map(Waiting::rank)
        else {
            return false;
        };
        if !self.blockers(thread).is_empty() {
            return false;
        }
        let wants = self.wants(thread);
        !self.threads.iter().any(|(id, entry)| {
            *id != thread
                && entry
                    .waiting
                    .as_ref()
                    .is_some_and(|w| w.rank() < rank)
                && self.blockers(*id).is_empty()
                && self
                    .wants(*id)
                    .iter()
                    .any(|other| wants.iter().any(|w| w.conflicts_with(other)))
        })
    }

    /// Record one more acquisition of `resource` by `thread`.
    pub fn add_holding(&mut self, thread: ThreadId, resource: Resource) {
        let entry = self.threads.entry(thread).or_default();
        match entry.held.iter_mut().find(|h| h.resource.same(&resource)) {
            Some(holding) => holding.depth += 1,
            None => entry.held.push(Holding { resource, depth: 1 }),
        }
    }

    pub fn begin_wait(&mut self, thread: ThreadId, resource: Resource) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let priority = self.priorities.get(&thread).copied().unwrap_or(0);
        self.threads.entry(thread).or_default().waiting = Some(Waiting {
            wanted: Some(resource),
            priority,
            ticket,
        });
    }

    /// Stop waiting for the wanted resource. Returns whether the thread still
    /// has suspended holdings it must wait for.
    pub fn abandon_wanted(&mut self, thread: ThreadId) -> bool {
        let Some(entry) = self.threads.get_mut(&thread) else {
            return false;
        };
        if let Some(waiting) = entry.waiting.as_mut() {
            waiting.wanted = None;
        }
        if entry.suspended.is_empty() {
            entry.waiting = None;
            self.prune(thread);
            false
        } else {
            true
        }
    }

    /// Drop every wait edge and suspended holding of `thread`. Returns the
    /// number of suspended holdings lost.
    pub fn abandon(&mut self, thread: ThreadId) -> usize {
        let lost = match self.threads.get_mut(&thread) {
            Some(entry) => {
                entry.waiting = None;
                std::mem::take(&mut entry.suspended).len()
            }
            None => 0,
        };
        self.prune(thread);
        lost
    }

    /// Give the waiting `thread` its wanted resource and restore its
    /// suspended holdings in their original order.
    pub fn grant(&mut self, thread: ThreadId) {
        let Some(entry) = self.threads.get_mut(&thread) else {
            return;
        };
        let wanted = entry.waiting.take().and_then(|w| w.wanted);
        let restored = std::mem::take(&mut entry.suspended);
        entry.held.extend(restored);
        if let Some(resource) = wanted {
            self.add_holding(thread, resource);
        }
    }

    /// Release one level of `resource`. Returns whether it was fully released.
    pub fn release(&mut self, thread: ThreadId, resource: &Resource) -> Result<bool, LockError> {
        let entry = self
            .threads
            .get_mut(&thread)
            .ok_or_else(|| LockError::NotOwner(resource.to_string()))?;
        let index = entry
            .held
            .iter()
            .rposition(|h| h.resource.same(resource))
            .ok_or_else(|| LockError::NotOwner(resource.to_string()))?;
        entry.held[index].depth -= 1;
        let released = entry.held[index].depth == 0;
        if released {
            entry.held.remove(index);
            self.prune(thread);
        }
        Ok(released)
    }

    fn prune(&mut self, thread: ThreadId) {
        if self.threads.get(&thread).is_some_and(ThreadEntry::is_idle) {
            self.threads.remove(&thread);
        }
    }

    /// Find a cycle of wait edges through `start`.
    ///
    /// Returns the threads on the cycle beginning with `start`; each waits on
    /// the next, and the last waits on `start`.
    pub fn find_cycle(&self, start: ThreadId) -> Option<Vec<ThreadId>> {
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        self.extend_path(start, &mut path, &mut visited)
            .then_some(path)
    }

    fn extend_path(
        &self,
        start: ThreadId,
        path: &mut Vec<ThreadId>,
        visited: &mut HashSet<ThreadId>,
    ) -> bool {
        let Some(&current) = path.last() else {
            return false;
        };
        for next in self.blockers(current) {
            if next == start {
                return true;
            }
            if visited.insert(next) {
                path.push(next);
                if self.extend_path(start, path, visited) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Break one wait cycle through `requester`, if there is one.
    ///
    /// Only explicit locks are taken away. The victim is a thread on the
    /// cycle whose holdings wanted by its predecessor on the cycle are all
    /// locks, preferring any thread over the requester itself. It loses every
    /// lock from the first contended holding onward; those become suspended
    /// and are regranted together with whatever the victim was waiting for.
    /// Rules acquired after that point stay held.
    pub fn resolve_deadlock(&mut self, requester: ThreadId) -> Resolution {
        let Some(cycle) = self.find_cycle(requester) else {
            return Resolution::NoCycle;
        };
        let len = cycle.len();
        let chosen = (1..len).chain(std::iter::once(0)).find_map(|i| {
            let victim = cycle[i];
            let wants = self.wants(cycle[(i + len - 1) % len]);
            let entry = self.threads.get(&victim)?;
            let contended: Vec<(usize, bool)> = entry
                .held
                .iter()
                .enumerate()
                .filter(|(_, h)| wants.iter().any(|w| w.conflicts_with(&h.resource)))
                .map(|(index, h)| (index, h.resource.is_lock()))
                .collect();
            let (first, _) = contended.first().copied()?;
            contended
                .iter()
                .all(|(_, is_lock)| *is_lock)
                .then_some((victim, first))
        });
        let Some((victim, index)) = chosen else {
            return Resolution::Stuck(cycle);
        };
        let Some(entry) = self.threads.get_mut(&victim) else {
            return Resolution::Stuck(cycle);
        };

        let tail: Vec<Holding> = entry.held.drain(index..).collect();
        let (mut locks, rules): (Vec<Holding>, Vec<Holding>) =
            tail.into_iter().partition(|h| h.resource.is_lock());
        entry.held.extend(rules);
        let count = locks.len();
        locks.append(&mut entry.suspended);
        entry.suspended = locks;
        debug!(
            victim = ?victim,
            requester = ?requester,
            cycle_len = len,
            suspended = count,
            "Forced transfer down"
        );
        Resolution::Transferred(TransferDown {
            victim,
            suspended: count,
        })
    }
}
