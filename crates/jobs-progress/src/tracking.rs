//! A headless monitor that remembers everything reported to it.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ProgressMonitor;

/// Point-in-time view of a [`TrackingProgressMonitor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Main task name, if a task was begun
    pub task_name: Option<String>,
    /// Latest sub task label
    pub sub_task: Option<String>,
    /// Total work declared by `begin_task` (`None` if unknown)
    pub total_work: Option<u32>,
    /// Cumulative work reported
    pub worked: f64,
    /// Whether `done` was called
    pub done: bool,
    /// Whether cancellation was requested
    pub canceled: bool,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_work {
            Some(total) if total > 0 => Some((self.worked / f64::from(total)).min(1.0)),
            _ => None,
        }
    }
}

/// A root monitor that records the task name, labels and cumulative ticks.
///
/// Useful as a progress group that several jobs report into, and as the
/// parent of sub monitors under test.
#[derive(Debug, Default)]
pub struct TrackingProgressMonitor {
    state: Mutex<ProgressSnapshot>,
    canceled: AtomicBool,
}

impl TrackingProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut snapshot = self.state.lock().clone();
        snapshot.canceled = self.is_canceled();
        snapshot
    }
}

impl ProgressMonitor for TrackingProgressMonitor {
    fn begin_task(&self, name: &str, total_work: Option<u32>) {
        let mut state = self.state.lock();
        state.task_name = Some(name.to_string());
        state.total_work = total_work;
        state.worked = 0.0;
        state.done = false;
        trace!(task = %name, ?total_work, "Task begun");
    }

    fn done(&self) {
        let mut state = self.state.lock();
        state.done = true;
        trace!(task = ?state.task_name, worked = state.worked, "Task done");
    }

    fn internal_worked(&self, work: f64) {
        if work > 0.0 {
            self.state.lock().worked += work;
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn set_canceled(&self, canceled: bool) {
        self.canceled.store(canceled, Ordering::SeqCst);
    }

    fn set_task_name(&self, name: &str) {
        self.state.lock().task_name = Some(name.to_string());
    }

    fn sub_task(&self, name: &str) {
        self.state.lock().sub_task = Some(name.to_string());
    }
}
