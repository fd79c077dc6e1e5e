//! Waiting and sleeping job queues.
//!
//! Waiting jobs are ordered by priority, then by the order they were
//! queued. Sleeping jobs are either parked indefinitely or ordered by the
//! instant they become waiting.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::{Job, Priority};

/// Position of a job in the queue, kept by the job so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKey {
    Waiting(Priority, u64),
    Sleeping(Option<Instant>, u64),
}

#[derive(Default)]
pub(crate) struct JobQueue {
    waiting: BTreeMap<(Priority, u64), Job>,
    timed: BTreeMap<(Instant, u64), Job>,
    parked: BTreeMap<u64, Job>,
    next_seq: u64,
}

impl JobQueue {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn push_waiting(&mut self, job: Job, priority: Priority) -> QueueKey {
        let seq = self.next_seq();
        self.waiting.insert((priority, seq), job);
        QueueKey::Waiting(priority, seq)
    }

    /// Park `job` until `wake_at`, or until explicitly woken when `None`.
    pub fn push_sleeping(&mut self, job: Job, wake_at: Option<Instant>) -> QueueKey {
        let seq = self.next_seq();
        match wake_at {
            Some(at) => {
                self.timed.insert((at, seq), job);
            }
            None => {
                self.parked.insert(seq, job);
            }
        }
        QueueKey::Sleeping(wake_at, seq)
    }

    pub fn remove(&mut self, key: QueueKey) -> Option<Job> {
        match key {
            QueueKey::Waiting(priority, seq) => self.waiting.remove(&(priority, seq)),
            QueueKey::Sleeping(Some(at), seq) => self.timed.remove(&(at, seq)),
            QueueKey::Sleeping(None, seq) => self.parked.remove(&seq),
        }
    }

    /// Remove and return the sleepers due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<Job> {
        let mut due = Vec::new();
        while let Some(entry) = self.timed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// When the next timed sleeper becomes due.
    pub fn next_wake(&self) -> Option<Instant> {
        self.timed.keys().next().map(|(at, _)| *at)
    }

    /// Waiting jobs in dispatch order.
    pub fn waiting(&self) -> impl Iterator<Item = (QueueKey, &Job)> {
        self.waiting
            .iter()
            .map(|((priority, seq), job)| (QueueKey::Waiting(*priority, *seq), job))
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn has_timed_sleepers(&self) -> bool {
        !self.timed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.timed.is_empty() && self.parked.is_empty()
    }

    /// Every queued job, waiting or sleeping.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.waiting
            .values()
            .chain(self.timed.values())
            .chain(self.parked.values())
    }

    pub fn drain(&mut self) -> Vec<Job> {
        let mut jobs: Vec<Job> = std::mem::take(&mut self.waiting).into_values().collect();
        jobs.extend(std::mem::take(&mut self.timed).into_values());
        jobs.extend(std::mem::take(&mut self.parked).into_values());
        jobs
    }
}
