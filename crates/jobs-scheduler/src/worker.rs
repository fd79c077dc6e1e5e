//! Worker threads: dispatch and job execution.
//!
//! Workers are spawned on demand up to the configured pool size and exit
//! after sitting idle for the idle timeout. The last worker stays while
//! jobs are queued, so blocked jobs are picked up once their rule is free
//! and timed sleepers are woken on time.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use jobs_locks::Resource;
use jobs_progress::ProgressMonitor;
use jobs_rules::{is_conflicting, RuleRef};
use parking_lot::MutexGuard;
use tracing::{debug, error, info, warn};

use crate::listener::{EventKind, PendingEvent};
use crate::manager::{SchedState, Shared};
use crate::{Job, JobState, JobStatus};

impl Shared {
    /// Start another worker if queued work outnumbers idle workers and the
    /// pool has room.
    pub(crate) fn ensure_worker(self: &Arc<Self>, state: &mut SchedState) {
        if !state.active {
            return;
        }
        let demand = state
            .queue
            .waiting_len()
            .max(usize::from(state.queue.has_timed_sleepers()));
        if state.pool.idle >= demand || state.pool.count >= self.config.effective_pool_size() {
            return;
        }

        state.pool.handles.retain(|handle| !handle.is_finished());
        let index = state.pool.next_index;
        state.pool.next_index += 1;
        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, index))
            .spawn(move || shared.worker_loop());
        match spawned {
            Ok(handle) => {
                state.pool.count += 1;
                state.pool.handles.push(handle);
                debug!(worker = index, workers = state.pool.count, "Worker spawned");
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn worker thread");
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        while let Some(job) = self.next_job() {
            self.run_job(&job);
        }
        debug!("Worker exiting");
    }

    /// Block until a job can run on this thread, then mark it running.
    /// Returns `None` when the worker should exit.
    fn next_job(self: &Arc<Self>) -> Option<Job> {
        let me = thread::current().id();
        let idle_timeout = self.config.idle_timeout();
        let mut state = self.state.lock();
        let mut idle_since = Instant::now();

        loop {
            state.pool.passes += 1;
            if !state.active {
                state.pool.count -= 1;
                return None;
            }

            let awake = state.wake_due(Instant::now());
            if !awake.is_empty() {
                MutexGuard::unlocked(&mut state, || self.fire(awake));
                continue;
            }

            if let Some((job, rule)) = self.select_job(&mut state) {
                let group = job.job_group();
                let priority = job.priority();
                {
                    let mut sched = job.sched();
                    sched.state = JobState::Running;
                    sched.queue_key = None;
                    sched.thread = Some(me);
                    sched.held_rule = rule;
                    sched.cancel_requested = false;
                    sched.canceling_notified = false;
                }
                if let Some(group) = group {
                    *state.group_running.entry(group.id()).or_default() += 1;
                }
                state.running.insert(job.id(), job.clone());
                state.threads.entry(me).or_default().job = Some(job.clone());
                self.locks.set_thread_priority(me, Some(priority as u32));
                self.ensure_worker(&mut state);
                self.state_changed.notify_all();
                return Some(job);
            }

            let retire_at = idle_since + idle_timeout;
            let overdue = Instant::now() >= retire_at;
            let last_has_work = state.pool.count == 1
                && (state.queue.waiting_len() > 0 || state.queue.has_timed_sleepers());
            if overdue && !last_has_work {
                state.pool.count -= 1;
                return None;
            }
            // A last worker kept past its idle timeout only wakes for work.
            let wake_at = match state.queue.next_wake() {
                Some(at) if overdue => Some(at),
                Some(at) => Some(at.min(retire_at)),
                None if overdue => None,
                None => Some(retire_at),
            };

            state.pool.idle += 1;
            let timed_out = match wake_at {
                Some(at) => self.work_available.wait_until(&mut state, at).timed_out(),
                None => {
                    self.work_available.wait(&mut state);
                    false
                }
            };
            state.pool.idle -= 1;
            if !timed_out {
                idle_since = Instant::now();
            }
        }
    }

    /// Remove the first waiting job that may run now, acquiring its rule
    /// for the calling thread. Members of a job group at its thread limit
    /// are passed over.
    fn select_job(&self, state: &mut SchedState) -> Option<(Job, Option<RuleRef>)> {
        if state.suspended {
            return None;
        }
        let mut skipped: Vec<RuleRef> = Vec::new();
        let mut chosen = None;
        for (key, job) in state.queue.waiting() {
            let throttled = job.job_group().is_some_and(|group| {
                let running = state.group_running.get(&group.id()).copied();
                !group.has_room(running.unwrap_or(0))
            });
            if throttled {
                skipped.extend(job.rule());
                continue;
            }
            let Some(rule) = job.rule() else {
                chosen = Some((key, None));
                break;
            };
            let blocked_by_earlier = skipped
                .iter()
                .any(|s| is_conflicting(Some(s.as_ref()), Some(rule.as_ref())));
            if !blocked_by_earlier && self.locks.try_acquire(Resource::Rule(rule.clone())) {
                chosen = Some((key, Some(rule)));
                break;
            }
            skipped.push(rule);
        }
        let (key, rule) = chosen?;
        let job = state.queue.remove(key)?;
        Some((job, rule))
    }

    fn create_monitor(&self, job: &Job) -> Arc<dyn ProgressMonitor> {
        let provider = self.provider.read().clone();
        match job.take_progress_group() {
            Some(group) => provider.create_monitor_in_group(job, group.monitor, group.ticks),
            None => provider.create_monitor(job),
        }
    }

    fn run_job(self: &Arc<Self>, job: &Job) {
        let monitor = self.create_monitor(job);
        {
            let _state = self.state.lock();
            let mut sched = job.sched();
            if sched.cancel_requested {
                monitor.set_canceled(true);
            }
            sched.monitor = Some(monitor.clone());
        }
        self.fire(vec![
            PendingEvent::new(EventKind::AboutToRun, job),
            PendingEvent::new(EventKind::Running, job),
        ]);

        info!(job = %job, priority = ?job.priority(), "Job started");
        let started = Instant::now();
        let status = if job.body().should_run() {
            match panic::catch_unwind(AssertUnwindSafe(|| job.body().run(monitor.as_ref()))) {
                Ok(status) => status,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(job = %job, panic = %message, "Job panicked");
                    JobStatus::error(format!("Job panicked: {}", message))
                }
            }
        } else {
            debug!(job = %job, "Job declined to run");
            JobStatus::cancel()
        };
        monitor.done();
        let status = status.attach(job);
        {
            let _state = self.state.lock();
            let mut sched = job.sched();
            sched.result = Some(status.clone());
            sched.monitor = None;
        }
        self.release_job_resources(job);
        info!(
            job = %job,
            severity = %status.severity(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        self.fire(vec![PendingEvent::done(job, status)]);
        self.finish_job(job);
    }

    /// Release the job's rule, any rules its body began but did not end, and
    /// any explicit locks it still holds.
    fn release_job_resources(&self, job: &Job) {
        let me = thread::current().id();
        let (held_rule, leftovers) = {
            let mut state = self.state.lock();
            let held_rule = job.sched().held_rule.take();
            let leftovers = state
                .threads
                .get_mut(&me)
                .map(|ctx| std::mem::take(&mut ctx.rules))
                .unwrap_or_default();
            (held_rule, leftovers)
        };

        if !leftovers.is_empty() {
            warn!(job = %job, count = leftovers.len(), "Job ended without ending every rule it began");
        }
        for entry in leftovers.into_iter().rev() {
            if let (Some(rule), true) = (entry.rule, entry.acquired) {
                if let Err(e) = self.locks.release(&Resource::Rule(rule)) {
                    error!(job = %job, error = %e, "Failed to release leftover rule");
                }
            }
        }
        if let Some(rule) = held_rule {
            if let Err(e) = self.locks.release(&Resource::Rule(rule)) {
                error!(job = %job, error = %e, "Failed to release job rule");
            }
        }
        for resource in self.locks.holdings() {
            warn!(job = %job, resource = %resource, "Job ended while holding a lock");
            while self.locks.depth(&resource) > 0 {
                if self.locks.release(&resource).is_err() {
                    break;
                }
            }
        }
    }

    /// Leave the running state: back to `None`, or queued again if the job
    /// was scheduled while it ran.
    fn finish_job(self: &Arc<Self>, job: &Job) {
        let me = thread::current().id();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            state.running.remove(&job.id());
            if let Some(group) = job.job_group() {
                if let Some(running) = state.group_running.get_mut(&group.id()) {
                    *running = running.saturating_sub(1);
                    if *running == 0 {
                        state.group_running.remove(&group.id());
                    }
                }
            }
            self.locks.set_thread_priority(me, None);
            if let Some(ctx) = state.threads.get_mut(&me) {
                ctx.job = None;
                if ctx.is_empty() {
                    state.threads.remove(&me);
                }
            }

            let mut sched = job.sched();
            sched.thread = None;
            sched.held_rule = None;
            sched.completions += 1;
            match sched.reschedule.take() {
                Some(delay) if state.active => {
                    state.enqueue(job, &mut sched, delay);
                    drop(sched);
                    self.ensure_worker(&mut state);
                    events.push(PendingEvent::scheduled(job, delay));
                }
                _ => sched.state = JobState::None,
            }
            self.state_changed.notify_all();
            self.work_available.notify_all();
        }
        self.fire(events);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
