//! The progress monitor contract and its no-op implementation.

use std::sync::atomic::{AtomicBool, Ordering};

/// A handle through which a task reports progress and observes cancellation.
///
/// Monitors are shared between the thread running a job and any thread that
/// wants to cancel it, so every method takes `&self` and implementations use
/// interior mutability.
///
/// Cancellation is cooperative: [`set_canceled`](Self::set_canceled) only
/// raises a flag. The task body is expected to poll
/// [`is_canceled`](Self::is_canceled) and unwind on its own.
pub trait ProgressMonitor: Send + Sync {
    /// Starts the main task. `total_work` of `None` means the amount of work
    /// is unknown. Must be called once, before any `worked` or `sub_task`.
    fn begin_task(&self, name: &str, total_work: Option<u32>);

    /// Marks the main task as finished.
    fn done(&self);

    /// Reports a (possibly fractional) amount of work in this monitor's units.
    fn internal_worked(&self, work: f64);

    /// Returns whether cancellation was requested.
    fn is_canceled(&self) -> bool;

    /// Raises or clears the cancellation flag.
    fn set_canceled(&self, canceled: bool);

    /// Renames the main task.
    fn set_task_name(&self, name: &str);

    /// Labels the part of the main task currently being worked on.
    fn sub_task(&self, name: &str);

    /// Reports `work` units of completed work.
    fn worked(&self, work: u32) {
        self.internal_worked(f64::from(work));
    }
}

/// A monitor that discards all progress and only remembers cancellation.
///
/// This is what jobs run with when the host installs no progress provider.
#[derive(Debug, Default)]
pub struct NullProgressMonitor {
    canceled: AtomicBool,
}

impl NullProgressMonitor {
    /// Create a monitor that is not canceled.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressMonitor for NullProgressMonitor {
    fn begin_task(&self, _name: &str, _total_work: Option<u32>) {}

    fn done(&self) {}

    fn internal_worked(&self, _work: f64) {}

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn set_canceled(&self, canceled: bool) {
        self.canceled.store(canceled, Ordering::SeqCst);
    }

    fn set_task_name(&self, _name: &str) {}

    fn sub_task(&self, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_null_monitor_cancel_flag() {
        let monitor = NullProgressMonitor::new();
        assert!(!monitor.is_canceled());

        monitor.set_canceled(true);
        assert!(monitor.is_canceled());

        monitor.set_canceled(false);
        assert!(!monitor.is_canceled());
    }

    #[test]
    fn test_null_monitor_ignores_progress() {
        let monitor = NullProgressMonitor::new();
        monitor.begin_task("task", Some(10));
        monitor.worked(5);
        monitor.sub_task("sub");
        monitor.done();
        assert!(!monitor.is_canceled());
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let monitor = Arc::new(NullProgressMonitor::new());
        let remote = monitor.clone();

        thread::spawn(move || remote.set_canceled(true))
            .join()
            .unwrap();

        assert!(monitor.is_canceled());
    }
}
