//! Progress reporting for tasks whose length is not known up front.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ProgressMonitor, SubProgressMonitor};

#[derive(Debug, Default)]
struct InfiniteState {
    total_work: u32,
    half_way: u32,
    current_increment: u32,
    next_progress: u32,
    worked: u32,
}

/// A child monitor for an unbounded number of work units.
///
/// Every call to [`worked`](ProgressMonitor::worked) counts as one unit,
/// whatever its argument. One unit of the `total_work` passed to
/// `begin_task` is reported per `current_increment` calls. Each time the
/// reported units pass the current halfway mark, the increment doubles and
/// the mark moves halfway towards the total, so reporting slows down
/// geometrically and approaches, but never exceeds, the allotted ticks.
///
/// Blank sub task names are dropped instead of being forwarded.
pub struct InfiniteSubProgressMonitor {
    inner: SubProgressMonitor,
    state: Mutex<InfiniteState>,
}

impl InfiniteSubProgressMonitor {
    /// Create a child that may report up to `parent_ticks` ticks to `parent`.
    pub fn new(parent: Arc<dyn ProgressMonitor>, parent_ticks: u32) -> Self {
        Self {
            inner: SubProgressMonitor::new(parent, parent_ticks),
            state: Mutex::new(InfiniteState::default()),
        }
    }

    /// Number of `worked` calls currently needed per reported unit.
    pub fn current_increment(&self) -> u32 {
        self.state.lock().current_increment
    }

    /// Units reported to the underlying sub monitor so far.
    pub fn units_reported(&self) -> u32 {
        self.state.lock().worked
    }
}

impl ProgressMonitor for InfiniteSubProgressMonitor {
    fn begin_task(&self, name: &str, total_work: Option<u32>) {
        self.inner.begin_task(name, total_work);
        let total_work = total_work.unwrap_or(0);
        let mut state = self.state.lock();
        *state = InfiniteState {
            total_work,
            half_way: total_work / 2,
            current_increment: 1,
            next_progress: 1,
            worked: 0,
        };
    }

    fn done(&self) {
        self.inner.done();
    }

    fn internal_worked(&self, work: f64) {
        self.inner.internal_worked(work);
    }

    fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    fn set_canceled(&self, canceled: bool) {
        self.inner.set_canceled(canceled);
    }

    fn set_task_name(&self, name: &str) {
        self.inner.set_task_name(name);
    }

    fn sub_task(&self, name: &str) {
        if !name.trim().is_empty() {
            self.inner.sub_task(name);
        }
    }

    fn worked(&self, _work: u32) {
        let report = {
            let mut state = self.state.lock();
            if state.worked >= state.total_work {
                return;
            }
            state.next_progress = state.next_progress.saturating_sub(1);
            if state.next_progress > 0 {
                return;
            }
            state.worked += 1;
            if state.worked >= state.half_way {
                state.current_increment = state.current_increment.saturating_mul(2);
                state.half_way += (state.total_work - state.half_way) / 2;
            }
            state.next_progress = state.current_increment;
            true
        };

        if report {
            self.inner.worked(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingProgressMonitor;
    use proptest::prelude::*;

    fn parent(total: u32) -> Arc<TrackingProgressMonitor> {
        let parent = Arc::new(TrackingProgressMonitor::new());
        parent.begin_task("parent", Some(total));
        parent
    }

    #[test]
    fn test_never_exceeds_allotment() {
        let parent = parent(32);
        let monitor = InfiniteSubProgressMonitor::new(parent.clone(), 32);
        monitor.begin_task("scan", Some(32));

        let mut last_increment = monitor.current_increment();
        for _ in 0..1000 {
            monitor.worked(1);
            let increment = monitor.current_increment();
            assert!(increment >= last_increment);
            last_increment = increment;
            assert!(parent.snapshot().worked <= 32.0 + 1e-9);
        }
        assert!(monitor.units_reported() <= 32);
    }

    #[test]
    fn test_first_half_reported_one_to_one() {
        let parent = parent(32);
        let monitor = InfiniteSubProgressMonitor::new(parent.clone(), 32);
        monitor.begin_task("scan", Some(32));

        for _ in 0..15 {
            monitor.worked(1);
        }
        assert!((parent.snapshot().worked - 15.0).abs() < 1e-9);
        assert_eq!(monitor.current_increment(), 1);

        // Passing the halfway mark doubles the increment.
        monitor.worked(1);
        assert_eq!(monitor.current_increment(), 2);
        monitor.worked(1);
        assert!((parent.snapshot().worked - 16.0).abs() < 1e-9);
        monitor.worked(1);
        assert!((parent.snapshot().worked - 17.0).abs() < 1e-9);
    }

    #[test]
    fn test_blank_sub_task_dropped() {
        let parent = parent(4);
        let monitor = InfiniteSubProgressMonitor::new(parent.clone(), 4);
        monitor.begin_task("scan", Some(4));
        monitor.sub_task("file-1");
        monitor.sub_task("");
        monitor.sub_task("   ");
        assert_eq!(parent.snapshot().sub_task.as_deref(), Some("file-1"));
    }

    #[test]
    fn test_unknown_total_reports_nothing_until_done() {
        let parent = parent(4);
        let monitor = InfiniteSubProgressMonitor::new(parent.clone(), 4);
        monitor.begin_task("scan", None);
        for _ in 0..10 {
            monitor.worked(1);
        }
        assert_eq!(parent.snapshot().worked, 0.0);
        monitor.done();
        assert!((parent.snapshot().worked - 4.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_infinite_monitor_is_bounded(exp in 1u32..10, calls in 0usize..5000) {
            let total = 1u32 << exp;
            let parent = parent(total);
            let monitor = InfiniteSubProgressMonitor::new(parent.clone(), total);
            monitor.begin_task("prop", Some(total));
            for _ in 0..calls {
                monitor.worked(1);
            }
            prop_assert!(parent.snapshot().worked <= f64::from(total) + 1e-9);
        }
    }
}
