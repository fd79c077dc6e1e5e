//! Progress reporting through the scheduler's progress provider.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use jobs_progress::{
    InfiniteSubProgressMonitor, ProgressMonitor, SubProgressMonitor, TrackingProgressMonitor,
};
use jobs_scheduler::{Job, ProgressProvider};

#[derive(Clone, Copy)]
enum Shape {
    Finite,
    Infinite,
}

/// Gives every job a child of a fresh tracking root, so a test can see
/// what reached the root.
struct RecordingProvider {
    shape: Shape,
    ticks: u32,
    roots: Mutex<Vec<(String, Arc<TrackingProgressMonitor>)>>,
    infinite: Mutex<Vec<Arc<InfiniteSubProgressMonitor>>>,
}

impl RecordingProvider {
    fn new(shape: Shape, ticks: u32) -> Arc<Self> {
        Arc::new(Self {
            shape,
            ticks,
            roots: Mutex::new(Vec::new()),
            infinite: Mutex::new(Vec::new()),
        })
    }

    fn root(&self, job: &str) -> Option<Arc<TrackingProgressMonitor>> {
        self.roots
            .lock()
            .iter()
            .find(|(name, _)| name == job)
            .map(|(_, root)| root.clone())
    }
}

impl ProgressProvider for RecordingProvider {
    fn create_monitor(&self, job: &Job) -> Arc<dyn ProgressMonitor> {
        let root = Arc::new(TrackingProgressMonitor::new());
        root.begin_task(job.name(), Some(self.ticks));
        self.roots
            .lock()
            .push((job.name().to_string(), root.clone()));
        match self.shape {
            Shape::Finite => Arc::new(SubProgressMonitor::new(root, self.ticks)),
            Shape::Infinite => {
                let monitor = Arc::new(InfiniteSubProgressMonitor::new(root, self.ticks));
                self.infinite.lock().push(monitor.clone());
                monitor
            }
        }
    }
}

/// 100 calls to `worked(1)` on a 100 tick task report exactly 100 ticks.
#[test]
fn test_finite_task_reports_exact_ticks() {
    let harness = TestHarness::new(1);
    let provider = RecordingProvider::new(Shape::Finite, 100);
    harness.manager.replace_progress_provider(provider.clone());

    let job = Job::from_fn("exact", |monitor| {
        monitor.begin_task("exact", Some(100));
        for _ in 0..100 {
            monitor.worked(1);
        }
        Ok(())
    });
    harness.schedule(&job);
    harness.join(&job);

    let root = provider.root("exact").expect("No monitor was created");
    assert!((root.snapshot().worked - 100.0).abs() < 1e-9);
}

/// A task of unknown length never reports more than its allotment, and its
/// reporting increment only grows.
#[test]
fn test_infinite_task_stays_within_allotment() {
    let harness = TestHarness::new(1);
    let provider = RecordingProvider::new(Shape::Infinite, 32);
    harness.manager.replace_progress_provider(provider.clone());

    let job = Job::from_fn("unbounded", |monitor| {
        monitor.begin_task("unbounded", Some(32));
        for _ in 0..1000 {
            monitor.worked(1);
        }
        Ok(())
    });
    harness.schedule(&job);
    harness.join(&job);

    let root = provider.root("unbounded").expect("No monitor was created");
    assert!(root.snapshot().worked <= 32.0 + 1e-9);
    let infinite = provider.infinite.lock();
    assert_eq!(infinite.len(), 1);
    assert!(infinite[0].units_reported() <= 32);
    assert!(infinite[0].current_increment() > 1);
}

/// Jobs sharing a progress group each fill their share of it.
#[test]
fn test_progress_group_collects_jobs() {
    let harness = TestHarness::new(3);
    assert!(!harness.manager.create_progress_group().is_canceled());

    let group = Arc::new(TrackingProgressMonitor::new());
    group.begin_task("group", Some(30));
    let jobs: Vec<Job> = (0..3)
        .map(|i| {
            let job = Job::from_fn(format!("member-{}", i), |monitor| {
                monitor.begin_task("member", Some(7));
                for _ in 0..7 {
                    monitor.worked(1);
                }
                Ok(())
            });
            job.set_progress_group(group.clone(), 10);
            job
        })
        .collect();
    for job in &jobs {
        harness.schedule(job);
    }
    for job in &jobs {
        harness.join(job);
    }

    assert!((group.snapshot().worked - 30.0).abs() < 1e-6);
}

/// Canceling a job cancels the monitor its body sees.
#[test]
fn test_cancel_reaches_provider_monitor() {
    let harness = TestHarness::new(1);
    let provider = RecordingProvider::new(Shape::Finite, 10);
    harness.manager.replace_progress_provider(provider.clone());

    let gate = e2e_tests::Gate::new();
    let held = gate.clone();
    let job = Job::from_fn("watched", move |monitor| {
        held.pass(monitor);
        Ok(())
    });
    harness.schedule(&job);
    assert!(e2e_tests::wait_until(|| gate.waiting() == 1));
    harness.manager.cancel(&job);
    harness.join(&job);

    let root = provider.root("watched").expect("No monitor was created");
    assert!(root.snapshot().canceled);
}
