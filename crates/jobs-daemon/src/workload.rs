//! Synthetic workloads driven by the CLI.
//!
//! `run` schedules jobs whose path rules overlap, so some of them must be
//! serialized, and checks that no two conflicting bodies ever overlap.
//! `stress` has jobs take the same explicit locks in random order, which
//! keeps the lock manager busy breaking wait cycles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jobs_locks::{LockStats, OrderedLock};
use jobs_progress::{ProgressMonitor, TrackingProgressMonitor};
use jobs_rules::{PathRule, RuleRef};
use jobs_scheduler::{Job, JobError, JobManager, Priority, SchedulerError, Severity};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Family of the jobs scheduled by [`Workload`].
pub const RUN_FAMILY: &str = "corejobs-run";

/// Family of the jobs scheduled by [`run_stress`].
pub const STRESS_FAMILY: &str = "corejobs-stress";

const PRIORITIES: [Priority; 5] = [
    Priority::Interactive,
    Priority::Short,
    Priority::Long,
    Priority::Build,
    Priority::Decorate,
];

/// Shape of a `run` workload.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub jobs: usize,
    pub projects: usize,
    pub max_duration_ms: u64,
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 16,
            projects: 3,
            max_duration_ms: 200,
            seed: None,
        }
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Paths whose bodies are running, for catching conflicting overlaps.
#[derive(Default)]
struct OverlapTracker {
    active: Mutex<Vec<PathRule>>,
    violations: AtomicU64,
}

impl OverlapTracker {
    fn enter(&self, path: &PathRule) {
        let mut active = self.active.lock();
        if active
            .iter()
            .any(|other| other.is_prefix_of(path) || path.is_prefix_of(other))
        {
            warn!(path = %path, "Conflicting jobs are running at the same time");
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        active.push(path.clone());
    }

    fn leave(&self, path: &PathRule) {
        let mut active = self.active.lock();
        if let Some(index) = active.iter().position(|p| p == path) {
            active.swap_remove(index);
        }
    }
}

/// Outcome of a `run` workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub jobs: usize,
    pub ok: usize,
    pub canceled: usize,
    pub failed: usize,
    /// Times two jobs with conflicting rules ran at once. Always zero.
    pub overlaps: u64,
    /// Fraction of the progress group completed.
    pub progress: f64,
    pub locks: LockStats,
}

/// A batch of scheduled `run` jobs.
pub struct Workload {
    manager: JobManager,
    jobs: Vec<Job>,
    group: Arc<TrackingProgressMonitor>,
    tracker: Arc<OverlapTracker>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Workload {
    /// Create and schedule the jobs described by `options`.
    ///
    /// Every job locks either a whole project or one file in it, takes a
    /// random priority and works for a random time in ten steps.
    pub fn schedule(manager: &JobManager, options: &RunOptions) -> Result<Self, SchedulerError> {
        let mut rng = rng_for(options.seed);
        let projects = options.projects.max(1);
        let max_duration = options.max_duration_ms.max(1);
        let tracker = Arc::new(OverlapTracker::default());

        let group = Arc::new(TrackingProgressMonitor::new());
        group.begin_task("run", u32::try_from(options.jobs).ok());

        let mut jobs = Vec::with_capacity(options.jobs);
        for index in 0..options.jobs {
            let project = rng.random_range(0..projects);
            let path = if rng.random_bool(0.3) {
                format!("/project-{}", project)
            } else {
                format!("/project-{}/file-{}", project, index)
            };
            let duration = Duration::from_millis(rng.random_range(1..=max_duration));
            let priority = PRIORITIES.choose(&mut rng).copied().unwrap_or_default();

            let job = simulated_job(format!("job-{}", index), &path, duration, tracker.clone());
            let rule: RuleRef = Arc::new(PathRule::new(&path));
            job.set_rule(Some(rule))?;
            job.set_priority(priority);
            job.add_family(RUN_FAMILY);
            job.set_progress_group(group.clone(), 1);
            jobs.push(job);
        }

        let started = Instant::now();
        let started_at = Utc::now();
        for job in &jobs {
            manager.schedule(job, Duration::ZERO)?;
        }
        info!(jobs = jobs.len(), projects, "Workload scheduled");

        Ok(Self {
            manager: manager.clone(),
            jobs,
            group,
            tracker,
            started,
            started_at,
        })
    }

    /// Block until every job has finished.
    pub fn wait(&self) -> Result<bool, SchedulerError> {
        self.manager.join_family(RUN_FAMILY, None, None)
    }

    /// Cancel every job that has not finished yet.
    pub fn cancel(&self) {
        self.group.set_canceled(true);
        self.manager.cancel_family(RUN_FAMILY);
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            jobs: self.jobs.len(),
            ok: 0,
            canceled: 0,
            failed: 0,
            overlaps: self.tracker.violations.load(Ordering::SeqCst),
            progress: self.group.snapshot().fraction().unwrap_or(1.0),
            locks: self.manager.lock_manager().stats(),
        };
        for job in &self.jobs {
            match job.result().map(|r| r.severity()) {
                Some(Severity::Ok) | Some(Severity::Info) | Some(Severity::Warning) => {
                    summary.ok += 1
                }
                Some(Severity::Cancel) => summary.canceled += 1,
                Some(Severity::Error) => summary.failed += 1,
                None => {}
            }
        }
        summary
    }
}

fn simulated_job(
    name: String,
    path: &str,
    duration: Duration,
    tracker: Arc<OverlapTracker>,
) -> Job {
    let path = PathRule::new(path);
    let step = duration / 10;
    Job::from_fn(name, move |monitor| {
        monitor.begin_task(&path.path(), Some(10));
        tracker.enter(&path);
        let outcome = (0..10).try_for_each(|_| {
            if monitor.is_canceled() {
                return Err(JobError::Canceled);
            }
            thread::sleep(step);
            monitor.worked(1);
            Ok(())
        });
        tracker.leave(&path);
        outcome
    })
}

/// Shape of a `stress` run.
#[derive(Debug, Clone)]
pub struct StressOptions {
    pub threads: usize,
    pub locks: usize,
    pub rounds: usize,
    pub seed: Option<u64>,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            threads: 3,
            locks: 3,
            rounds: 50,
            seed: None,
        }
    }
}

/// Outcome of a `stress` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub threads: usize,
    pub rounds_completed: u64,
    pub locks: LockStats,
}

/// Schedule `threads` jobs that each take every lock, in a fresh random
/// order, `rounds` times. Returns once all of them have finished.
pub fn run_stress(
    manager: &JobManager,
    options: &StressOptions,
) -> Result<StressSummary, SchedulerError> {
    let started = Instant::now();
    let started_at = Utc::now();
    let locks: Arc<Vec<OrderedLock>> =
        Arc::new((0..options.locks.max(1)).map(|_| manager.new_lock()).collect());
    let completed = Arc::new(AtomicU64::new(0));
    let base_seed = options.seed.unwrap_or_else(rand::random);

    let jobs: Vec<Job> = (0..options.threads)
        .map(|index| {
            let (locks, completed) = (locks.clone(), completed.clone());
            let rounds = options.rounds;
            let seed = base_seed.wrapping_add(index as u64);
            let job = Job::from_fn(format!("stress-{}", index), move |monitor| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut order: Vec<usize> = (0..locks.len()).collect();
                for _ in 0..rounds {
                    if monitor.is_canceled() {
                        return Err(JobError::Canceled);
                    }
                    order.shuffle(&mut rng);
                    let guards: Vec<_> = order.iter().map(|&i| locks[i].lock()).collect();
                    thread::yield_now();
                    drop(guards);
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            });
            job.add_family(STRESS_FAMILY);
            job.set_priority(Priority::Short);
            job
        })
        .collect();

    for job in &jobs {
        manager.schedule(job, Duration::ZERO)?;
    }
    debug!(jobs = jobs.len(), locks = locks.len(), "Stress jobs scheduled");
    manager.join_family(STRESS_FAMILY, None, None)?;

    Ok(StressSummary {
        started_at,
        elapsed_ms: started.elapsed().as_millis() as u64,
        threads: options.threads,
        rounds_completed: completed.load(Ordering::SeqCst),
        locks: manager.lock_manager().stats(),
    })
}
