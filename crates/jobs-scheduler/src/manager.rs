//! The job manager: lifecycle control, families, joins and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use jobs_locks::{LockManager, OrderedLock, Resource};
use jobs_progress::ProgressMonitor;
use jobs_rules::{is_conflicting, validate_rule};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::implicit::ThreadContext;
use crate::job::JobSched;
use crate::listener::{dispatch, EventKind, PendingEvent};
use crate::queue::{JobQueue, QueueKey};
use crate::{
    Job, JobChangeListener, JobGroup, JobState, JobStatus, NullProgressProvider,
    ProgressProvider, SchedulerConfig, SchedulerError,
};

#[derive(Default)]
pub(crate) struct WorkerPool {
    pub count: usize,
    pub idle: usize,
    pub next_index: usize,
    pub handles: Vec<JoinHandle<()>>,
    /// Dispatch loop iterations across all workers.
    pub passes: u64,
}

pub(crate) struct SchedState {
    pub queue: JobQueue,
    pub running: HashMap<u64, Job>,
    /// Running members per job group id.
    pub group_running: HashMap<u64, usize>,
    pub threads: HashMap<ThreadId, ThreadContext>,
    pub pool: WorkerPool,
    pub suspended: bool,
    pub active: bool,
}

impl SchedState {
    /// Queue a job that is not running: waiting now, or sleeping for `delay`.
    /// Replaces any previous queue entry of the job.
    pub fn enqueue(&mut self, job: &Job, sched: &mut JobSched, delay: Duration) {
        if let Some(key) = sched.queue_key.take() {
            self.queue.remove(key);
        }
        let key = if delay.is_zero() {
            sched.state = JobState::Waiting;
            self.queue.push_waiting(job.clone(), job.priority())
        } else {
            sched.state = JobState::Sleeping;
            self.queue
                .push_sleeping(job.clone(), Some(Instant::now() + delay))
        };
        sched.queue_key = Some(key);
    }

    /// Move sleepers whose delay has elapsed to the waiting queue.
    pub fn wake_due(&mut self, now: Instant) -> Vec<PendingEvent> {
        let mut events = Vec::new();
        for job in self.queue.take_due(now) {
            let mut sched = job.sched();
            sched.queue_key = None;
            self.enqueue(&job, &mut sched, Duration::ZERO);
            drop(sched);
            events.push(PendingEvent::new(EventKind::Awake, &job));
        }
        events
    }

    /// Dequeue a job that is not running and mark it as canceled.
    fn cancel_queued(&mut self, job: &Job, sched: &mut JobSched) -> JobStatus {
        if let Some(key) = sched.queue_key.take() {
            self.queue.remove(key);
        }
        let status = JobStatus::cancel().attach(job);
        sched.state = JobState::None;
        sched.result = Some(status.clone());
        sched.completions += 1;
        status
    }

    fn current_job(&self, thread: ThreadId) -> Option<&Job> {
        self.threads.get(&thread).and_then(|ctx| ctx.job.as_ref())
    }
}

pub(crate) struct Shared {
    pub state: Mutex<SchedState>,
    /// Signalled when workers may find something to do.
    pub work_available: Condvar,
    /// Signalled when a job leaves the running state or is canceled.
    pub state_changed: Condvar,
    pub locks: Arc<LockManager>,
    pub provider: RwLock<Arc<dyn ProgressProvider>>,
    listeners: RwLock<Vec<Arc<dyn JobChangeListener>>>,
    pub config: SchedulerConfig,
    pub shutdown_token: CancellationToken,
}

impl Shared {
    pub fn fire(&self, events: Vec<PendingEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for pending in &events {
            dispatch(&listeners, pending);
        }
    }

    /// Wake idle workers, starting one if none is around. Must not be
    /// called with the state locked.
    pub fn signal_work(self: &Arc<Self>) {
        let mut state = self.state.lock();
        self.ensure_worker(&mut state);
        self.work_available.notify_all();
    }
}

/// Schedules jobs onto a bounded pool of worker threads.
///
/// Jobs wait in a queue ordered by priority and then arrival. A worker
/// takes the first waiting job whose scheduling rule it can acquire, skipping
/// jobs that conflict with an earlier job it had to skip, so a job never
/// overtakes an earlier conflicting one of equal or higher priority. The
/// rule stays held by the worker thread for the whole run and is released
/// before `done` listeners are told the result.
///
/// Client threads can hold rules too, with [`begin_rule`](Self::begin_rule)
/// and [`end_rule`](Self::end_rule); they exclude conflicting jobs the same
/// way. All rule and lock waits go through one [`LockManager`], which never
/// lets them deadlock.
///
/// `JobManager` is a cheap handle; clones share the same manager.
#[derive(Clone)]
pub struct JobManager {
    pub(crate) shared: Arc<Shared>,
}

impl JobManager {
    /// Create a manager. Workers are started on demand.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration does not
    /// validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let locks = Arc::new(LockManager::with_poll_interval(config.lock_poll_interval()));
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedState {
                queue: JobQueue::default(),
                running: HashMap::new(),
                group_running: HashMap::new(),
                threads: HashMap::new(),
                pool: WorkerPool::default(),
                suspended: false,
                active: true,
            }),
            work_available: Condvar::new(),
            state_changed: Condvar::new(),
            locks: locks.clone(),
            provider: RwLock::new(Arc::new(NullProgressProvider)),
            listeners: RwLock::new(Vec::new()),
            config,
            shutdown_token: CancellationToken::new(),
        });

        // A released rule may unblock a waiting job.
        let weak = Arc::downgrade(&shared);
        locks.set_release_hook(move || {
            if let Some(shared) = weak.upgrade() {
                shared.signal_work();
            }
        });

        info!(
            pool_size = shared.config.effective_pool_size(),
            "Job manager created"
        );
        Ok(Self { shared })
    }

    /// Install `provider` as the manager's progress provider.
    pub fn with_progress_provider(self, provider: Arc<dyn ProgressProvider>) -> Self {
        self.replace_progress_provider(provider);
        self
    }

    /// Swap the progress provider, returning the previous one. Jobs already
    /// running keep the monitor they were given.
    pub fn replace_progress_provider(
        &self,
        provider: Arc<dyn ProgressProvider>,
    ) -> Arc<dyn ProgressProvider> {
        std::mem::replace(&mut *self.shared.provider.write(), provider)
    }

    pub fn progress_provider(&self) -> Arc<dyn ProgressProvider> {
        self.shared.provider.read().clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Register a listener for changes of every job.
    pub fn add_job_change_listener(&self, listener: Arc<dyn JobChangeListener>) {
        self.shared.listeners.write().push(listener);
    }

    pub fn remove_job_change_listener(&self, listener: &Arc<dyn JobChangeListener>) {
        self.shared
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// The lock manager arbitrating rules and explicit locks.
    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.shared.locks.clone()
    }

    /// Create an explicit lock that takes part in deadlock avoidance with
    /// the rules held by jobs and client threads.
    pub fn new_lock(&self) -> OrderedLock {
        self.shared.locks.new_lock()
    }

    /// A progress monitor several jobs can report into, through
    /// [`Job::set_progress_group`].
    pub fn create_progress_group(&self) -> Arc<dyn ProgressMonitor> {
        self.progress_provider().create_progress_group()
    }

    /// Token cancelled when the manager shuts down. Long-running job bodies
    /// can watch it alongside their progress monitor.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown_token.clone()
    }

    /// Queue `job` to run after `delay`.
    ///
    /// A job that is already waiting or sleeping is re-queued with the new
    /// delay. A running job is scheduled again once its current run ends,
    /// using the delay of the last such call.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidRule` if the job's rule is not
    /// reflexive and `SchedulerError::ShutDown` after [`shutdown`](Self::shutdown).
    pub fn schedule(&self, job: &Job, delay: Duration) -> Result<(), SchedulerError> {
        if let Some(rule) = job.rule() {
            validate_rule(rule.as_ref())?;
        }
        if !job.body().should_schedule() {
            debug!(job = %job, "Job declined to be scheduled");
            return Ok(());
        }

        {
            let mut state = self.shared.state.lock();
            if !state.active {
                return Err(SchedulerError::ShutDown);
            }
            let mut sched = job.sched();
            if sched.state == JobState::Running {
                sched.reschedule = Some(delay);
                debug!(job = %job, "Running job will be rescheduled when it ends");
                return Ok(());
            }
            state.enqueue(job, &mut sched, delay);
            drop(sched);
            self.shared.ensure_worker(&mut state);
            self.shared.work_available.notify_all();
        }

        debug!(job = %job, delay_ms = delay.as_millis() as u64, "Job scheduled");
        self.shared
            .fire(vec![PendingEvent::scheduled(job, delay)]);
        Ok(())
    }

    /// Cancel `job`.
    ///
    /// A waiting or sleeping job is removed from the queue and finishes with
    /// a CANCEL status; returns `true`. A running job has its monitor
    /// canceled and its `canceling` hook called once; it keeps running until
    /// its body notices, and this returns `false`. A job that is not
    /// scheduled is left alone; returns `true`.
    pub fn cancel(&self, job: &Job) -> bool {
        let mut events = Vec::new();
        let mut notify_canceling = false;
        let mut monitor = None;
        let removed = {
            let mut state = self.shared.state.lock();
            let mut sched = job.sched();
            match sched.state {
                JobState::None => true,
                JobState::Waiting | JobState::Sleeping => {
                    let status = state.cancel_queued(job, &mut sched);
                    events.push(PendingEvent::done(job, status));
                    self.shared.state_changed.notify_all();
                    true
                }
                JobState::Running => {
                    notify_canceling = !sched.canceling_notified;
                    sched.canceling_notified = true;
                    sched.cancel_requested = true;
                    monitor = sched.monitor.clone();
                    false
                }
            }
        };

        if let Some(monitor) = monitor {
            monitor.set_canceled(true);
        }
        if notify_canceling {
            debug!(job = %job, "Canceling running job");
            job.body().canceling();
        }
        self.shared.fire(events);
        removed
    }

    /// Put a waiting or sleeping job to sleep until [`wake_up`](Self::wake_up).
    ///
    /// Returns `false` only for a running job, which cannot sleep. A job that
    /// is not scheduled is unaffected.
    pub fn sleep(&self, job: &Job) -> bool {
        {
            let mut state = self.shared.state.lock();
            let mut sched = job.sched();
            match sched.state {
                JobState::None => return true,
                JobState::Running => return false,
                JobState::Waiting | JobState::Sleeping => {
                    if let Some(key) = sched.queue_key.take() {
                        state.queue.remove(key);
                    }
                    sched.state = JobState::Sleeping;
                    sched.queue_key = Some(state.queue.push_sleeping(job.clone(), None));
                }
            }
        }
        debug!(job = %job, "Job put to sleep");
        self.shared
            .fire(vec![PendingEvent::new(EventKind::Sleeping, job)]);
        true
    }

    /// Make a sleeping job waiting again after `delay`. Jobs in any other
    /// state are unaffected.
    pub fn wake_up(&self, job: &Job, delay: Duration) {
        let events = {
            let mut state = self.shared.state.lock();
            let mut sched = job.sched();
            if sched.state != JobState::Sleeping {
                return;
            }
            state.enqueue(job, &mut sched, delay);
            drop(sched);
            self.shared.ensure_worker(&mut state);
            self.shared.work_available.notify_all();
            if delay.is_zero() {
                vec![PendingEvent::new(EventKind::Awake, job)]
            } else {
                Vec::new()
            }
        };
        self.shared.fire(events);
    }

    /// Block until `job` finishes its current or next run, or is canceled.
    ///
    /// Returns `Ok(true)` once the job has left the running state (or at
    /// once if it is not scheduled) and `Ok(false)` if `timeout` elapsed
    /// first. While the manager is suspended, joining a job that is not
    /// running returns `Ok(false)` immediately.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::JoinSelf` when called from the job's own body
    /// - `SchedulerError::JoinDeadlock` when called without a timeout from a
    ///   job of the same throttled [`JobGroup`]
    /// - `SchedulerError::JoinDeadlock` when the job is queued and its rule
    ///   conflicts with a rule the calling thread holds
    /// - `SchedulerError::Canceled` when `monitor` is canceled while waiting
    pub fn join(
        &self,
        job: &Job,
        timeout: Option<Duration>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<bool, SchedulerError> {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();

        if state.current_job(me) == Some(job) {
            return Err(SchedulerError::JoinSelf(job.to_string()));
        }
        if timeout.is_none() {
            let throttled = job.job_group().filter(JobGroup::is_throttled);
            let current_group = state.current_job(me).and_then(Job::job_group);
            if let (Some(group), Some(current)) = (throttled, current_group) {
                if group == current {
                    return Err(SchedulerError::JoinDeadlock(format!(
                        "{} is in the throttled group {} of the calling job",
                        job, group
                    )));
                }
            }
        }
        let (job_state, target) = {
            let sched = job.sched();
            (sched.state, sched.completions)
        };
        if job_state == JobState::None {
            return Ok(true);
        }
        if state.suspended && job_state != JobState::Running {
            return Ok(false);
        }
        if job_state != JobState::Running {
            if let Some(rule) = job.rule() {
                let deadlocks = self.shared.locks.holdings().iter().any(|held| match held {
                    Resource::Rule(held) => {
                        is_conflicting(Some(held.as_ref()), Some(rule.as_ref()))
                    }
                    Resource::Lock(_) => false,
                });
                if deadlocks {
                    return Err(SchedulerError::JoinDeadlock(job.to_string()));
                }
            }
        }

        let finished = || {
            let sched = job.sched();
            sched.state == JobState::None || sched.completions > target
        };
        loop {
            if finished() {
                return Ok(true);
            }
            if let Some(monitor) = monitor {
                if MutexGuard::unlocked(&mut state, || monitor.is_canceled()) {
                    return Err(SchedulerError::Canceled);
                }
                if finished() {
                    return Ok(true);
                }
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Ok(false);
            }
            let poll = monitor.map(|_| now + self.shared.config.lock_poll_interval());
            match earliest(deadline, poll) {
                Some(at) => {
                    self.shared.state_changed.wait_until(&mut state, at);
                }
                None => self.shared.state_changed.wait(&mut state),
            }
        }
    }

    /// Jobs that are waiting, sleeping or running, optionally restricted to
    /// members of `family`. Ordered by creation.
    pub fn find(&self, family: Option<&str>) -> Vec<Job> {
        self.find_matching(|job| family.map_or(true, |f| job.belongs_to(f)))
    }

    /// Scheduled members of `group`, ordered by creation.
    pub fn group_jobs(&self, group: &JobGroup) -> Vec<Job> {
        self.find_matching(|job| job.job_group().as_ref() == Some(group))
    }

    fn find_matching(&self, matches: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = {
            let state = self.shared.state.lock();
            state
                .running
                .values()
                .chain(state.queue.jobs())
                .cloned()
                .collect()
        };
        jobs.retain(|job| matches(job));
        jobs.sort_by_key(Job::id);
        jobs
    }

    /// Cancel every scheduled member of `group`.
    pub fn cancel_group(&self, group: &JobGroup) {
        for job in self.group_jobs(group) {
            self.cancel(&job);
        }
    }

    /// Block until no member of `group` is waiting, running, or sleeping
    /// with a delay, like [`join_family`](Self::join_family).
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Canceled` when `monitor` is canceled.
    pub fn join_group(
        &self,
        group: &JobGroup,
        timeout: Option<Duration>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<bool, SchedulerError> {
        self.join_matching(|| self.group_jobs(group), timeout, monitor)
    }

    /// Cancel every scheduled member of `family`.
    pub fn cancel_family(&self, family: &str) {
        for job in self.find(Some(family)) {
            self.cancel(&job);
        }
    }

    /// Put every waiting or sleeping member of `family` to sleep.
    pub fn sleep_family(&self, family: &str) {
        for job in self.find(Some(family)) {
            self.sleep(&job);
        }
    }

    /// Wake every sleeping member of `family` after `delay`.
    pub fn wake_up_family(&self, family: &str, delay: Duration) {
        for job in self.find(Some(family)) {
            self.wake_up(&job, delay);
        }
    }

    /// Block until no member of `family` is waiting, running, or sleeping
    /// with a delay. Members parked indefinitely are not waited for, nor is
    /// the calling thread's own job.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first, or if the manager is
    /// suspended and none of the remaining members is running.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Canceled` when `monitor` is canceled.
    pub fn join_family(
        &self,
        family: &str,
        timeout: Option<Duration>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<bool, SchedulerError> {
        self.join_matching(|| self.find(Some(family)), timeout, monitor)
    }

    fn join_matching(
        &self,
        members: impl Fn() -> Vec<Job>,
        timeout: Option<Duration>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<bool, SchedulerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let current = self.current_job();
        loop {
            let pending: Vec<(Job, JobState)> = members()
                .into_iter()
                .filter(|job| Some(job) != current.as_ref())
                .filter_map(|job| {
                    let sched = job.sched();
                    let blocking = match sched.state {
                        JobState::Waiting | JobState::Running => true,
                        JobState::Sleeping => {
                            matches!(sched.queue_key, Some(QueueKey::Sleeping(Some(_), _)))
                        }
                        JobState::None => false,
                    };
                    let state = sched.state;
                    drop(sched);
                    blocking.then_some((job, state))
                })
                .collect();
            if pending.is_empty() {
                return Ok(true);
            }
            if self.is_suspended() && pending.iter().all(|(_, s)| *s != JobState::Running) {
                return Ok(false);
            }
            if monitor.is_some_and(|m| m.is_canceled()) {
                return Err(SchedulerError::Canceled);
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Ok(false);
            }

            let poll = now + self.shared.config.lock_poll_interval();
            let at = deadline.map_or(poll, |d| d.min(poll));
            let mut state = self.shared.state.lock();
            self.shared.state_changed.wait_until(&mut state, at);
        }
    }

    /// Stop dispatching jobs. Running jobs are unaffected.
    pub fn suspend(&self) {
        self.shared.state.lock().suspended = true;
        info!("Job manager suspended");
    }

    /// Resume dispatching after [`suspend`](Self::suspend).
    pub fn resume(&self) {
        {
            let mut state = self.shared.state.lock();
            state.suspended = false;
            self.shared.ensure_worker(&mut state);
            self.shared.work_available.notify_all();
        }
        info!("Job manager resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Returns whether `job` is running and holds something another thread
    /// or a waiting job is waiting for.
    pub fn is_blocking(&self, job: &Job) -> bool {
        let state = self.shared.state.lock();
        let (thread, rule) = {
            let sched = job.sched();
            if sched.state != JobState::Running {
                return false;
            }
            (sched.thread, sched.held_rule.clone())
        };
        if thread.is_some_and(|t| self.shared.locks.is_blocking(t)) {
            return true;
        }
        let Some(rule) = rule else {
            return false;
        };
        let blocking = state.queue.waiting().any(|(_, waiting)| {
            waiting
                .rule()
                .is_some_and(|r| is_conflicting(Some(r.as_ref()), Some(rule.as_ref())))
        });
        blocking
    }

    /// Give waiting jobs that conflict with the calling job's rule a chance
    /// to run.
    ///
    /// Must be called from the body of a running job. Returns `Ok(None)` at
    /// once if no waiting job conflicts with the rule the job runs under.
    /// Otherwise the rule is released, the first such job is given the
    /// chance to start, and the rule is acquired again before the job that
    /// was unblocked is returned. Other rules and locks the job holds are
    /// kept, and cancellation is not observed while waiting.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NotInJob` when the calling thread is not running a job
    /// - `SchedulerError::YieldInNestedRule` while the body is inside a rule
    ///   it began itself
    pub fn yield_rule(&self) -> Result<Option<Job>, SchedulerError> {
        let me = thread::current().id();
        let (job, rule, unblocked) = {
            let state = self.shared.state.lock();
            let Some(job) = state.current_job(me).cloned() else {
                return Err(SchedulerError::NotInJob("yield_rule".to_string()));
            };
            if state.threads.get(&me).is_some_and(|ctx| !ctx.rules.is_empty()) {
                return Err(SchedulerError::YieldInNestedRule(job.to_string()));
            }
            let Some(rule) = job.sched().held_rule.clone() else {
                return Ok(None);
            };
            let unblocked = state
                .queue
                .waiting()
                .map(|(_, waiting)| waiting)
                .find(|waiting| {
                    waiting
                        .rule()
                        .is_some_and(|r| is_conflicting(Some(r.as_ref()), Some(rule.as_ref())))
                })
                .cloned();
            let Some(unblocked) = unblocked else {
                return Ok(None);
            };
            job.sched().held_rule = None;
            (job, rule, unblocked)
        };

        debug!(job = %job, unblocked = %unblocked, "Yielding rule");
        let resource = Resource::Rule(rule.clone());
        self.shared.locks.release(&resource)?;
        {
            let mut state = self.shared.state.lock();
            let pool_size = self.shared.config.effective_pool_size();
            while unblocked.state() == JobState::Waiting
                && state.active
                && !state.suspended
                && (state.pool.idle > 0 || state.pool.count < pool_size)
            {
                let poll = Instant::now() + self.shared.config.lock_poll_interval();
                self.shared.state_changed.wait_until(&mut state, poll);
            }
        }

        self.shared.locks.acquire(resource);
        {
            let _state = self.shared.state.lock();
            job.sched().held_rule = Some(rule);
        }
        debug!(job = %job, "Rule reacquired after yield");
        Ok(Some(unblocked))
    }

    /// The job the calling thread is running, if it is a worker.
    pub fn current_job(&self) -> Option<Job> {
        let me = thread::current().id();
        self.shared.state.lock().current_job(me).cloned()
    }

    /// Stop accepting work and wind down the worker pool.
    ///
    /// Queued jobs are canceled, running jobs have their monitors canceled,
    /// and the shutdown token is cancelled. Waits up to the configured
    /// shutdown timeout for workers to exit. Calling it again has no effect.
    pub fn shutdown(&self) {
        let me = thread::current().id();
        let (canceled, running, handles) = {
            let mut state = self.shared.state.lock();
            if !state.active {
                return;
            }
            state.active = false;

            let mut canceled = Vec::new();
            for job in state.queue.drain() {
                let mut sched = job.sched();
                sched.queue_key = None;
                let status = state.cancel_queued(&job, &mut sched);
                drop(sched);
                canceled.push(PendingEvent::done(&job, status));
            }
            let running: Vec<Job> = state.running.values().cloned().collect();
            let handles = std::mem::take(&mut state.pool.handles);
            self.shared.work_available.notify_all();
            self.shared.state_changed.notify_all();
            (canceled, running, handles)
        };

        info!(
            canceled = canceled.len(),
            running = running.len(),
            "Shutting down job manager"
        );
        self.shared.fire(canceled);
        for job in &running {
            self.cancel(job);
        }
        self.shared.shutdown_token.cancel();

        let deadline = Instant::now() + self.shared.config.shutdown_timeout();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                warn!(
                    worker = handle.thread().name().unwrap_or("unnamed"),
                    "Worker still running at shutdown timeout"
                );
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
        info!("Job manager shut down");
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
