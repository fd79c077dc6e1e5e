//! Terminal statuses, cancellation and joins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use e2e_tests::{path_rule, wait_until, Gate, TestHarness};
use jobs_rules::RuleRef;
use jobs_scheduler::{
    Job, JobChangeEvent, JobChangeListener, JobError, JobManager, JobState, SchedulerError,
    Severity,
};

/// Checks in `done` that the job's rule can already be taken without
/// blocking.
struct RuleFreeOnDone {
    manager: JobManager,
    rule: RuleRef,
    free: Mutex<Vec<bool>>,
}

impl JobChangeListener for RuleFreeOnDone {
    fn done(&self, _event: &JobChangeEvent) {
        let free = self
            .manager
            .try_begin_rule(Some(self.rule.clone()))
            .unwrap_or(false);
        if free {
            self.manager
                .end_rule(Some(&self.rule))
                .expect("Failed to end rule");
        }
        self.free.lock().push(free);
    }
}

/// Each run produces exactly one `done`, delivered once the rule is free.
#[test]
fn test_single_status_after_rule_release() {
    let harness = TestHarness::new(2);
    let rule = path_rule("/status");
    let job = Job::from_fn("reporter", |_| Ok(()));
    job.set_rule(Some(rule.clone())).unwrap();
    let listener = Arc::new(RuleFreeOnDone {
        manager: harness.manager.clone(),
        rule,
        free: Mutex::new(Vec::new()),
    });
    job.add_listener(listener.clone());

    for _ in 0..3 {
        harness.schedule(&job);
        harness.join(&job);
    }
    assert_eq!(*listener.free.lock(), vec![true, true, true]);
    assert_eq!(
        harness.events.done_for("reporter"),
        vec![Severity::Ok, Severity::Ok, Severity::Ok]
    );
}

/// Cancel issued from another thread is seen by the body and reported.
#[test]
fn test_cross_thread_cancel() {
    let harness = TestHarness::new(1);
    let canceling_calls = Arc::new(AtomicUsize::new(0));
    let gate = Gate::new();

    struct Cancelable {
        gate: Arc<Gate>,
        canceling_calls: Arc<AtomicUsize>,
    }

    impl jobs_scheduler::JobBody for Cancelable {
        fn run(&self, monitor: &dyn jobs_progress::ProgressMonitor) -> jobs_scheduler::JobStatus {
            if self.gate.pass(monitor) {
                jobs_scheduler::JobStatus::ok()
            } else {
                jobs_scheduler::JobStatus::cancel()
            }
        }

        fn canceling(&self) {
            self.canceling_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    let job = Job::new(
        "cancelable",
        Cancelable {
            gate: gate.clone(),
            canceling_calls: canceling_calls.clone(),
        },
    );
    harness.schedule(&job);
    assert!(wait_until(|| gate.waiting() == 1));

    let manager = harness.manager.clone();
    let target = job.clone();
    let canceler = thread::spawn(move || {
        let first = manager.cancel(&target);
        let second = manager.cancel(&target);
        (first, second)
    });
    assert_eq!(canceler.join().unwrap(), (false, false));

    harness.join(&job);
    assert_eq!(job.result().unwrap().severity(), Severity::Cancel);
    assert_eq!(canceling_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.events.done_for("cancelable"), vec![Severity::Cancel]);
}

/// Canceling a job before it runs reports CANCEL without running it.
#[test]
fn test_cancel_before_run() {
    let harness = TestHarness::new(1);
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let job = Job::from_fn("never", move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    harness.manager.suspend();
    harness.schedule(&job);
    assert!(harness.manager.cancel(&job));
    harness.manager.resume();

    harness.join(&job);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(job.state(), JobState::None);
    assert_eq!(harness.events.done_for("never"), vec![Severity::Cancel]);
}

/// Failures and panics become ERROR statuses and free the rule.
#[test]
fn test_failures_become_errors() {
    let harness = TestHarness::new(1);
    let rule = path_rule("/fragile");

    let failing = Job::from_fn("failing", |_| Err(JobError::failed("checksum mismatch")));
    failing.set_rule(Some(rule.clone())).unwrap();
    let panicking = Job::from_fn("panicking", |_| panic!("index out of range"));
    panicking.set_rule(Some(rule.clone())).unwrap();
    let after = Job::from_fn("after", |_| Ok(()));
    after.set_rule(Some(rule)).unwrap();

    for job in [&failing, &panicking, &after] {
        harness.schedule(job);
    }
    for job in [&failing, &panicking, &after] {
        harness.join(job);
    }

    let failed = failing.result().unwrap();
    assert_eq!(failed.severity(), Severity::Error);
    assert_eq!(failed.message(), "checksum mismatch");
    assert!(failed.error_source().is_some());

    let panicked = panicking.result().unwrap();
    assert_eq!(panicked.severity(), Severity::Error);
    assert!(panicked.message().contains("index out of range"));

    assert!(after.result().unwrap().is_ok());
}

/// Joining from inside the job, or while holding the rule a queued job
/// needs, is refused rather than hanging.
#[test]
fn test_join_refusals() {
    let harness = TestHarness::new(1);

    let refused = Arc::new(Mutex::new(None));
    let (manager, seen) = (harness.manager.clone(), refused.clone());
    let selfish = Job::from_fn("selfish", move |_| {
        if let Some(me) = manager.current_job() {
            *seen.lock() = Some(matches!(
                manager.join(&me, None, None),
                Err(SchedulerError::JoinSelf(_))
            ));
        }
        Ok(())
    });
    harness.schedule(&selfish);
    harness.join(&selfish);
    assert_eq!(*refused.lock(), Some(true));

    let rule = path_rule("/held");
    harness.manager.begin_rule(Some(rule.clone()), None).unwrap();
    let queued = Job::from_fn("queued", |_| Ok(()));
    queued.set_rule(Some(rule.clone())).unwrap();
    harness.schedule(&queued);
    assert!(matches!(
        harness.manager.join(&queued, None, None),
        Err(SchedulerError::JoinDeadlock(_))
    ));
    harness.manager.end_rule(Some(&rule)).unwrap();
    harness.join(&queued);
}

/// Family operations address every member and nothing else.
#[test]
fn test_family_cancel_and_join() {
    let harness = TestHarness::new(2);
    let gate = Gate::new();
    let members: Vec<Job> = (0..4)
        .map(|i| {
            let gate = gate.clone();
            let job = Job::from_fn(format!("member-{}", i), move |monitor| {
                if gate.pass(monitor) {
                    Ok(())
                } else {
                    Err(JobError::Canceled)
                }
            });
            job.add_family("batch");
            job
        })
        .collect();
    let outsider = Job::from_fn("outsider", |_| Ok(()));

    for job in &members {
        harness.schedule(job);
    }
    harness
        .manager
        .schedule(&outsider, Duration::from_secs(60))
        .unwrap();
    assert!(wait_until(|| gate.waiting() == 2));
    assert_eq!(harness.manager.find(Some("batch")).len(), 4);

    harness.manager.cancel_family("batch");
    assert!(harness
        .manager
        .join_family("batch", Some(Duration::from_secs(20)), None)
        .unwrap());

    assert!(members
        .iter()
        .all(|j| j.result().is_some_and(|r| r.is_canceled())));
    assert_eq!(outsider.state(), JobState::Sleeping);
    assert!(harness.manager.find(Some("batch")).is_empty());
}

/// Shutdown cancels queued work and refuses new work.
#[test]
fn test_shutdown_cancels_queue() {
    let harness = TestHarness::new(1);
    let token = harness.manager.shutdown_token();
    let queued = Job::from_fn("queued", |_| Ok(()));
    harness
        .manager
        .schedule(&queued, Duration::from_secs(60))
        .unwrap();

    harness.manager.shutdown();
    assert!(token.is_cancelled());
    assert_eq!(queued.result().unwrap().severity(), Severity::Cancel);
    assert!(matches!(
        harness.manager.schedule(&queued, Duration::ZERO),
        Err(SchedulerError::ShutDown)
    ));
}
