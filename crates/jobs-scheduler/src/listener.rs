//! Job change notifications.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::{Job, JobStatus};

/// What happened to a job.
#[derive(Debug, Clone)]
pub struct JobChangeEvent {
    pub job: Job,
    /// Set for `done` events.
    pub result: Option<JobStatus>,
    /// Requested delay, for `scheduled` events.
    pub delay: Duration,
}

/// Observer of job lifecycle transitions.
///
/// Listeners are registered on the manager (all jobs) or on a single job.
/// They run on the thread causing the transition, never while the manager
/// is locked, so they may call back into the manager. A panicking listener
/// is logged and does not affect the job or other listeners.
///
/// `done` is delivered exactly once per run, after the job's rule and any
/// rules its body left begun have been released.
pub trait JobChangeListener: Send + Sync {
    /// The job is about to run.
    fn about_to_run(&self, _event: &JobChangeEvent) {}

    /// A sleeping job became waiting.
    fn awake(&self, _event: &JobChangeEvent) {}

    /// The job finished, or was canceled while queued.
    fn done(&self, _event: &JobChangeEvent) {}

    /// The job started running.
    fn running(&self, _event: &JobChangeEvent) {}

    /// The job was scheduled.
    fn scheduled(&self, _event: &JobChangeEvent) {}

    /// The job was put to sleep.
    fn sleeping(&self, _event: &JobChangeEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    AboutToRun,
    Awake,
    Done,
    Running,
    Scheduled,
    Sleeping,
}

pub(crate) struct PendingEvent {
    pub kind: EventKind,
    pub event: JobChangeEvent,
}

impl PendingEvent {
    pub fn new(kind: EventKind, job: &Job) -> Self {
        Self {
            kind,
            event: JobChangeEvent {
                job: job.clone(),
                result: None,
                delay: Duration::ZERO,
            },
        }
    }

    pub fn done(job: &Job, result: JobStatus) -> Self {
        let mut pending = Self::new(EventKind::Done, job);
        pending.event.result = Some(result);
        pending
    }

    pub fn scheduled(job: &Job, delay: Duration) -> Self {
        let mut pending = Self::new(EventKind::Scheduled, job);
        pending.event.delay = delay;
        pending
    }
}

/// Deliver `pending` to the manager-wide listeners, then the job's own.
pub(crate) fn dispatch(global: &[Arc<dyn JobChangeListener>], pending: &PendingEvent) {
    let local = pending.event.job.listeners();
    for listener in global.iter().chain(local.iter()) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let event = &pending.event;
            match pending.kind {
                EventKind::AboutToRun => listener.about_to_run(event),
                EventKind::Awake => listener.awake(event),
                EventKind::Done => listener.done(event),
                EventKind::Running => listener.running(event),
                EventKind::Scheduled => listener.scheduled(event),
                EventKind::Sleeping => listener.sleeping(event),
            }
        }));
        if outcome.is_err() {
            error!(
                job = %pending.event.job,
                event = ?pending.kind,
                "Job change listener panicked"
            );
        }
    }
}
