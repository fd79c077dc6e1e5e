//! Dispatch order and rule exclusion.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use e2e_tests::{path_rule, wait_until, Event, Gate, RunLog, TestHarness};
use jobs_rules::PathRule;
use jobs_scheduler::{Job, JobError, JobState, Priority, Severity};

/// INTERACTIVE jobs overtake LONG ones on a single worker.
#[test]
fn test_interactive_runs_before_long() {
    let harness = TestHarness::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let job = |name: &'static str, priority: Priority| {
        let order = order.clone();
        let job = Job::from_fn(name, move |_| {
            order.lock().push(name);
            Ok(())
        });
        job.set_priority(priority);
        job
    };
    let a = job("A", Priority::Long);
    let b = job("B", Priority::Interactive);

    // Hold the only worker so both jobs are queued together.
    let gate = Gate::new();
    let blocker = {
        let gate = gate.clone();
        Job::from_fn("blocker", move |monitor| {
            gate.pass(monitor);
            Ok(())
        })
    };
    harness.schedule(&blocker);
    assert!(wait_until(|| gate.waiting() == 1));
    harness.schedule(&a);
    harness.schedule(&b);
    gate.open();

    harness.join(&a);
    harness.join(&b);
    assert_eq!(*order.lock(), vec!["B", "A"]);
}

/// A job whose rule conflicts with a running job stays WAITING until the
/// holder reaches a terminal status.
#[test]
fn test_conflicting_job_waits_for_holder() {
    let harness = TestHarness::new(4);
    let rule = path_rule("/repo");
    let gate = Gate::new();

    let a = {
        let gate = gate.clone();
        Job::from_fn("A", move |monitor| {
            gate.pass(monitor);
            Ok(())
        })
    };
    a.set_rule(Some(rule.clone())).unwrap();
    let b = Job::from_fn("B", |_| Ok(()));
    b.set_rule(Some(rule)).unwrap();

    harness.schedule(&a);
    assert!(wait_until(|| gate.waiting() == 1));
    harness.schedule(&b);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(b.state(), JobState::Waiting);
    assert!(harness.events.done_for("A").is_empty());

    gate.open();
    harness.join(&b);
    assert_eq!(a.result().map(|r| r.severity()), Some(Severity::Ok));
    assert_eq!(harness.events.done_for("B"), vec![Severity::Ok]);
}

/// Jobs with disjoint rules run in parallel.
#[test]
fn test_disjoint_rules_run_concurrently() {
    let harness = TestHarness::new(2);
    let gate = Gate::new();
    let jobs: Vec<Job> = ["/left", "/right"]
        .iter()
        .map(|path| {
            let gate = gate.clone();
            let job = Job::from_fn(*path, move |monitor| {
                gate.pass(monitor);
                Ok(())
            });
            job.set_rule(Some(path_rule(path))).unwrap();
            job
        })
        .collect();
    for job in &jobs {
        harness.schedule(job);
    }
    assert!(wait_until(|| gate.waiting() == 2));
    gate.open();
    for job in &jobs {
        harness.join(job);
    }
}

/// Conflicting bodies never overlap, however the jobs are interleaved.
#[test]
fn test_conflicting_rules_never_overlap_under_stress() {
    let harness = TestHarness::new(8);
    let log = RunLog::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let jobs: Vec<Job> = (0..60)
        .map(|i| {
            let project = rng.random_range(0..3);
            let path = match rng.random_range(0..3) {
                0 => format!("/p{}", project),
                1 => format!("/p{}/dir", project),
                _ => format!("/p{}/dir/file{}", project, i),
            };
            let sleep = Duration::from_millis(rng.random_range(1..8));
            let rule = PathRule::new(&path);
            let log = log.clone();
            let name = format!("job-{}", i);
            let job = Job::from_fn(name.clone(), move |_| {
                log.record(&name, &rule, || thread::sleep(sleep));
                Ok(())
            });
            job.set_rule(Some(path_rule(&path))).unwrap();
            job.set_priority(if i % 4 == 0 {
                Priority::Short
            } else {
                Priority::Long
            });
            job
        })
        .collect();

    for job in &jobs {
        harness.schedule(job);
    }
    for job in &jobs {
        harness.join(job);
    }

    assert_eq!(log.windows().len(), 60);
    assert_eq!(log.conflicting_overlaps(), Vec::<(String, String)>::new());
    assert!(jobs
        .iter()
        .all(|j| j.result().is_some_and(|r| r.is_ok())));
}

/// A waiting job with a conflicting rule never jumps ahead of an earlier
/// one of the same priority.
#[test]
fn test_conflicting_jobs_keep_arrival_order() {
    let harness = TestHarness::new(4);
    let gate = Gate::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = {
        let gate = gate.clone();
        Job::from_fn("holder", move |monitor| {
            gate.pass(monitor);
            Ok(())
        })
    };
    holder.set_rule(Some(path_rule("/shared"))).unwrap();
    harness.schedule(&holder);
    assert!(wait_until(|| gate.waiting() == 1));

    let followers: Vec<Job> = (0..5)
        .map(|i| {
            let order = order.clone();
            let job = Job::from_fn(format!("f{}", i), move |_| {
                order.lock().push(i);
                Ok(())
            });
            job.set_rule(Some(path_rule("/shared/data"))).unwrap();
            job
        })
        .collect();
    for job in &followers {
        harness.schedule(job);
    }
    gate.open();
    for job in &followers {
        harness.join(job);
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

/// Sleeping jobs do not run until woken; delayed jobs run on their own.
#[test]
fn test_sleep_wake_and_delay() {
    let harness = TestHarness::new(2);
    let sleeper = Job::from_fn("sleeper", |_| Ok(()));
    harness
        .manager
        .schedule(&sleeper, Duration::from_secs(1))
        .unwrap();
    assert!(harness.manager.sleep(&sleeper));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sleeper.state(), JobState::Sleeping);

    harness.manager.wake_up(&sleeper, Duration::ZERO);
    harness.join(&sleeper);
    assert_eq!(
        harness.events.events_for("sleeper"),
        vec![
            Event::Scheduled("sleeper".to_string()),
            Event::Sleeping("sleeper".to_string()),
            Event::Awake("sleeper".to_string()),
            Event::AboutToRun("sleeper".to_string()),
            Event::Running("sleeper".to_string()),
            Event::Done("sleeper".to_string(), Severity::Ok),
        ]
    );

    let delayed = Job::from_fn("delayed", |_| Ok(()));
    harness
        .manager
        .schedule(&delayed, Duration::from_millis(200))
        .unwrap();
    assert_eq!(delayed.state(), JobState::Sleeping);
    harness.join(&delayed);
    assert!(harness
        .events
        .events_for("delayed")
        .contains(&Event::Awake("delayed".to_string())));
}

/// A job body can schedule follow-up work that needs the rule it holds.
#[test]
fn test_job_body_schedules_follow_up() {
    let harness = TestHarness::new(2);
    let follow_up = Job::from_fn("follow-up", |_| Ok(()));
    follow_up.set_rule(Some(path_rule("/chain"))).unwrap();

    let manager = harness.manager.clone();
    let next = follow_up.clone();
    let first = Job::from_fn("first", move |_| {
        manager
            .schedule(&next, Duration::ZERO)
            .map_err(JobError::from)
    });
    first.set_rule(Some(path_rule("/chain"))).unwrap();

    harness.schedule(&first);
    harness.join(&first);
    assert!(wait_until(|| follow_up
        .result()
        .is_some_and(|r| r.is_ok())));
}
