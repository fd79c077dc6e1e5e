//! End-to-end test infrastructure for the job scheduler.
//!
//! Provides a shared TestHarness plus helpers for observing jobs from the
//! outside: a listener that logs every lifecycle event, a gate that holds
//! job bodies until a test releases them, and a log of when each body ran.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use jobs_progress::ProgressMonitor;
use jobs_rules::{PathRule, RuleRef};
use jobs_scheduler::{
    Job, JobChangeEvent, JobChangeListener, JobManager, SchedulerConfig, Severity,
};

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(20);

/// Route scheduler logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A job manager with an [`EventLog`] listening to every job.
pub struct TestHarness {
    pub manager: JobManager,
    pub events: Arc<EventLog>,
}

impl TestHarness {
    /// Create a manager with a fixed number of workers.
    pub fn new(workers: usize) -> Self {
        init_tracing();
        let manager = JobManager::new(SchedulerConfig::with_workers(workers))
            .expect("Failed to create job manager");
        let events = Arc::new(EventLog::default());
        manager.add_job_change_listener(events.clone());
        Self { manager, events }
    }

    pub fn schedule(&self, job: &Job) {
        self.manager
            .schedule(job, Duration::ZERO)
            .expect("Failed to schedule job");
    }

    /// Join with the harness timeout; panics if the job does not finish.
    pub fn join(&self, job: &Job) {
        let finished = self
            .manager
            .join(job, Some(TIMEOUT), None)
            .expect("Failed to join job");
        assert!(finished, "{} did not finish in time", job);
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

/// A lifecycle event as seen by [`EventLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Scheduled(String),
    AboutToRun(String),
    Running(String),
    Sleeping(String),
    Awake(String),
    Done(String, Severity),
}

/// Records every job change in the order it was delivered.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events concerning the job named `name`.
    pub fn events_for(&self, name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                Event::Scheduled(n)
                | Event::AboutToRun(n)
                | Event::Running(n)
                | Event::Sleeping(n)
                | Event::Awake(n)
                | Event::Done(n, _) => n == name,
            })
            .collect()
    }

    /// Severities of the `done` events delivered for `name`.
    pub fn done_for(&self, name: &str) -> Vec<Severity> {
        self.events_for(name)
            .into_iter()
            .filter_map(|event| match event {
                Event::Done(_, severity) => Some(severity),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl JobChangeListener for EventLog {
    fn about_to_run(&self, event: &JobChangeEvent) {
        self.push(Event::AboutToRun(event.job.name().to_string()));
    }

    fn awake(&self, event: &JobChangeEvent) {
        self.push(Event::Awake(event.job.name().to_string()));
    }

    fn done(&self, event: &JobChangeEvent) {
        let severity = event
            .result
            .as_ref()
            .map(|status| status.severity())
            .unwrap_or(Severity::Error);
        self.push(Event::Done(event.job.name().to_string(), severity));
    }

    fn running(&self, event: &JobChangeEvent) {
        self.push(Event::Running(event.job.name().to_string()));
    }

    fn scheduled(&self, event: &JobChangeEvent) {
        self.push(Event::Scheduled(event.job.name().to_string()));
    }

    fn sleeping(&self, event: &JobChangeEvent) {
        self.push(Event::Sleeping(event.job.name().to_string()));
    }
}

/// Holds job bodies until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    waiting: Mutex<usize>,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Number of bodies currently blocked on the gate.
    pub fn waiting(&self) -> usize {
        *self.waiting.lock()
    }

    /// Block until the gate opens. Returns `false` if `monitor` was
    /// canceled first.
    pub fn pass(&self, monitor: &dyn ProgressMonitor) -> bool {
        *self.waiting.lock() += 1;
        let mut open = self.open.lock();
        let passed = loop {
            if *open {
                break true;
            }
            if monitor.is_canceled() {
                break false;
            }
            self.opened.wait_for(&mut open, Duration::from_millis(5));
        };
        drop(open);
        *self.waiting.lock() -= 1;
        passed
    }
}

/// When a job body ran, and under which path.
#[derive(Debug, Clone)]
pub struct RunWindow {
    pub job: String,
    pub path: PathRule,
    pub start: Instant,
    pub end: Instant,
}

/// Collects [`RunWindow`]s from job bodies.
#[derive(Default)]
pub struct RunLog {
    windows: Mutex<Vec<RunWindow>>,
}

impl RunLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `body`, recording the time it took.
    pub fn record<T>(&self, job: &str, path: &PathRule, body: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = body();
        let end = Instant::now();
        self.windows.lock().push(RunWindow {
            job: job.to_string(),
            path: path.clone(),
            start,
            end,
        });
        result
    }

    pub fn windows(&self) -> Vec<RunWindow> {
        self.windows.lock().clone()
    }

    /// Pairs of jobs with conflicting paths whose bodies overlapped in time.
    pub fn conflicting_overlaps(&self) -> Vec<(String, String)> {
        let windows = self.windows();
        let mut overlaps = Vec::new();
        for (i, a) in windows.iter().enumerate() {
            for b in &windows[i + 1..] {
                let conflict = a.path.is_prefix_of(&b.path) || b.path.is_prefix_of(&a.path);
                let overlap = a.start < b.end && b.start < a.end;
                if conflict && overlap {
                    overlaps.push((a.job.clone(), b.job.clone()));
                }
            }
        }
        overlaps
    }
}

pub fn path_rule(path: &str) -> RuleRef {
    Arc::new(PathRule::new(path))
}

/// Poll `condition` until it holds or [`TIMEOUT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
