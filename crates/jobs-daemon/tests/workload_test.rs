//! Integration tests for the synthetic workloads.

use pretty_assertions::assert_eq;

use jobs_daemon::{run_stress, RunOptions, StressOptions, Workload};
use jobs_scheduler::{JobManager, SchedulerConfig};

fn manager(workers: usize) -> JobManager {
    JobManager::new(SchedulerConfig::with_workers(workers)).expect("Failed to create manager")
}

#[test]
fn test_run_workload_serializes_conflicting_jobs() {
    let manager = manager(4);
    let options = RunOptions {
        jobs: 24,
        projects: 2,
        max_duration_ms: 20,
        seed: Some(42),
    };
    let workload = Workload::schedule(&manager, &options).unwrap();
    assert!(workload.wait().unwrap());

    let summary = workload.summary();
    assert_eq!(summary.jobs, 24);
    assert_eq!(summary.ok, 24);
    assert_eq!(summary.canceled + summary.failed, 0);
    assert_eq!(summary.overlaps, 0);
    assert!((summary.progress - 1.0).abs() < 1e-9);
    assert!(summary.finished_at >= summary.started_at);
    manager.shutdown();
}

#[test]
fn test_canceled_workload_reports_cancellations() {
    let manager = manager(1);
    let options = RunOptions {
        jobs: 8,
        projects: 1,
        max_duration_ms: 500,
        seed: Some(7),
    };
    let workload = Workload::schedule(&manager, &options).unwrap();
    workload.cancel();
    assert!(workload.wait().unwrap());

    let summary = workload.summary();
    assert_eq!(summary.ok + summary.canceled, 8);
    assert!(summary.canceled >= 7);
    manager.shutdown();
}

#[test]
fn test_summary_serializes_to_json() {
    let manager = manager(2);
    let options = RunOptions {
        jobs: 2,
        max_duration_ms: 5,
        seed: Some(1),
        ..RunOptions::default()
    };
    let workload = Workload::schedule(&manager, &options).unwrap();
    workload.wait().unwrap();

    let json = serde_json::to_value(workload.summary()).unwrap();
    assert_eq!(json["jobs"], 2);
    assert!(json["locks"]["acquisitions"].as_u64().unwrap() >= 2);
    manager.shutdown();
}

#[test]
fn test_stress_completes_every_round() {
    let manager = manager(3);
    let options = StressOptions {
        threads: 3,
        locks: 3,
        rounds: 30,
        seed: Some(11),
    };
    let summary = run_stress(&manager, &options).unwrap();
    assert_eq!(summary.rounds_completed, 90);
    assert!(summary.locks.acquisitions >= 270);
    assert!(manager.lock_manager().is_empty());
    manager.shutdown();
}
