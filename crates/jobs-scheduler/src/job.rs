//! Jobs, their bodies and their lifecycle state.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use jobs_progress::ProgressMonitor;
use jobs_rules::{validate_rule, RuleRef};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::queue::QueueKey;
use crate::{JobChangeListener, JobError, JobGroup, JobStatus, SchedulerError};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatch priority. Lower values run first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Short jobs a user is waiting on.
    Interactive = 10,
    /// Jobs expected to finish quickly.
    Short = 20,
    #[default]
    Long = 30,
    /// Builds and other expensive batch work.
    Build = 40,
    /// Cosmetic background work that should never delay anything else.
    Decorate = 50,
}

/// Where a job is in its lifecycle.
///
/// `None → Waiting → Running → {None | Sleeping → Waiting}`; a job is in
/// exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not scheduled.
    #[default]
    None,
    /// Parked until woken or until its delay elapses.
    Sleeping,
    /// Queued and eligible to run.
    Waiting,
    Running,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::None => "none",
            JobState::Sleeping => "sleeping",
            JobState::Waiting => "waiting",
            JobState::Running => "running",
        };
        f.write_str(name)
    }
}

/// The work a job performs, plus optional hooks.
pub trait JobBody: Send + Sync {
    /// Perform the work, reporting progress to and polling cancellation of
    /// `monitor`.
    fn run(&self, monitor: &dyn ProgressMonitor) -> JobStatus;

    /// Returns whether the job is part of `family`, in addition to the
    /// families added with [`Job::add_family`].
    fn belongs_to(&self, family: &str) -> bool {
        let _ = family;
        false
    }

    /// Consulted before the job is queued. Returning `false` skips scheduling.
    fn should_schedule(&self) -> bool {
        true
    }

    /// Consulted right before the job runs. Returning `false` ends the run
    /// with a CANCEL status.
    fn should_run(&self) -> bool {
        true
    }

    /// Called once when a running job is canceled.
    fn canceling(&self) {}
}

struct FnBody<F>(F);

impl<F> JobBody for FnBody<F>
where
    F: Fn(&dyn ProgressMonitor) -> Result<(), JobError> + Send + Sync,
{
    fn run(&self, monitor: &dyn ProgressMonitor) -> JobStatus {
        JobStatus::from_result((self.0)(monitor))
    }
}

#[derive(Clone)]
pub(crate) struct ProgressGroup {
    pub monitor: Arc<dyn ProgressMonitor>,
    pub ticks: u32,
}

struct JobSettings {
    priority: Priority,
    rule: Option<RuleRef>,
    system: bool,
    user: bool,
    progress_group: Option<ProgressGroup>,
    job_group: Option<JobGroup>,
    families: Vec<String>,
    properties: HashMap<String, String>,
    listeners: Vec<Arc<dyn JobChangeListener>>,
}

/// Scheduling bookkeeping. Mutated only while the manager state is locked.
#[derive(Default)]
pub(crate) struct JobSched {
    pub state: JobState,
    pub result: Option<JobStatus>,
    pub queue_key: Option<QueueKey>,
    pub monitor: Option<Arc<dyn ProgressMonitor>>,
    pub thread: Option<ThreadId>,
    pub held_rule: Option<RuleRef>,
    pub cancel_requested: bool,
    pub canceling_notified: bool,
    pub reschedule: Option<Duration>,
    /// Times the job left the running state or was canceled while queued.
    pub completions: u64,
}

pub(crate) struct JobInner {
    id: u64,
    name: String,
    body: Box<dyn JobBody>,
    settings: Mutex<JobSettings>,
    sched: Mutex<JobSched>,
}

/// A unit of schedulable work.
///
/// `Job` is a cheap handle; clones refer to the same job. A job may be
/// scheduled again once it is back in [`JobState::None`].
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(name: impl Into<String>, body: impl JobBody + 'static) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                body: Box::new(body),
                settings: Mutex::new(JobSettings {
                    priority: Priority::default(),
                    rule: None,
                    system: false,
                    user: false,
                    progress_group: None,
                    job_group: None,
                    families: Vec::new(),
                    properties: HashMap::new(),
                    listeners: Vec::new(),
                }),
                sched: Mutex::new(JobSched::default()),
            }),
        }
    }

    /// Create a job from a closure.
    ///
    /// `Ok` becomes an OK status, `Err(JobError::Canceled)` a CANCEL status
    /// and `Err(JobError::Failed)` an ERROR status carrying the cause.
    pub fn from_fn<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&dyn ProgressMonitor) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self::new(name, FnBody(run))
    }

    pub(crate) fn from_inner(inner: Arc<JobInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<JobInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn body(&self) -> &dyn JobBody {
        self.inner.body.as_ref()
    }

    pub(crate) fn sched(&self) -> MutexGuard<'_, JobSched> {
        self.inner.sched.lock()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> JobState {
        self.inner.sched.lock().state
    }

    /// Status of the most recent run, if the job has finished at least once.
    pub fn result(&self) -> Option<JobStatus> {
        self.inner.sched.lock().result.clone()
    }

    pub fn priority(&self) -> Priority {
        self.inner.settings.lock().priority
    }

    /// Change the priority. A job that is already waiting keeps its place
    /// until it is scheduled again.
    pub fn set_priority(&self, priority: Priority) {
        self.inner.settings.lock().priority = priority;
    }

    pub fn rule(&self) -> Option<RuleRef> {
        self.inner.settings.lock().rule.clone()
    }

    /// Set the rule the job runs under.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::JobNotIdle` unless the job is in
    /// [`JobState::None`], or `SchedulerError::InvalidRule` for a rule that is
    /// not reflexive.
    pub fn set_rule(&self, rule: Option<RuleRef>) -> Result<(), SchedulerError> {
        if let Some(rule) = &rule {
            validate_rule(rule.as_ref())?;
        }
        let state = self.state();
        if state != JobState::None {
            return Err(SchedulerError::JobNotIdle(format!("{} is {}", self, state)));
        }
        self.inner.settings.lock().rule = rule;
        Ok(())
    }

    /// System jobs are internal bookkeeping that a UI would hide.
    pub fn is_system(&self) -> bool {
        self.inner.settings.lock().system
    }

    pub fn set_system(&self, system: bool) {
        self.inner.settings.lock().system = system;
    }

    /// User jobs were started directly by a person.
    pub fn is_user(&self) -> bool {
        self.inner.settings.lock().user
    }

    pub fn set_user(&self, user: bool) {
        self.inner.settings.lock().user = user;
    }

    /// Report the next run's progress into `group`, using `ticks` of it.
    /// The group is used by one run only.
    pub fn set_progress_group(&self, group: Arc<dyn ProgressMonitor>, ticks: u32) {
        self.inner.settings.lock().progress_group = Some(ProgressGroup {
            monitor: group,
            ticks,
        });
    }

    pub(crate) fn take_progress_group(&self) -> Option<ProgressGroup> {
        self.inner.settings.lock().progress_group.take()
    }

    pub fn job_group(&self) -> Option<JobGroup> {
        self.inner.settings.lock().job_group.clone()
    }

    /// Put the job in `group`, or take it out with `None`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::JobNotIdle` unless the job is in
    /// [`JobState::None`].
    pub fn set_job_group(&self, group: Option<JobGroup>) -> Result<(), SchedulerError> {
        let state = self.state();
        if state != JobState::None {
            return Err(SchedulerError::JobNotIdle(format!("{} is {}", self, state)));
        }
        self.inner.settings.lock().job_group = group;
        Ok(())
    }

    pub fn add_family(&self, family: impl Into<String>) {
        self.inner.settings.lock().families.push(family.into());
    }

    pub fn belongs_to(&self, family: &str) -> bool {
        let tagged = self
            .inner
            .settings
            .lock()
            .families
            .iter()
            .any(|f| f == family);
        tagged || self.body().belongs_to(family)
    }

    /// Set or, with `None`, remove a property.
    pub fn set_property(&self, key: impl Into<String>, value: Option<String>) {
        let mut settings = self.inner.settings.lock();
        let key = key.into();
        match value {
            Some(value) => {
                settings.properties.insert(key, value);
            }
            None => {
                settings.properties.remove(&key);
            }
        }
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.inner.settings.lock().properties.get(key).cloned()
    }

    /// Register a listener notified of this job's changes only.
    pub fn add_listener(&self, listener: Arc<dyn JobChangeListener>) {
        self.inner.settings.lock().listeners.push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn JobChangeListener>) {
        self.inner
            .settings
            .lock()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn JobChangeListener>> {
        self.inner.settings.lock().listeners.clone()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(#{})", self.inner.name, self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs_progress::NullProgressMonitor;
    use jobs_rules::PathRule;

    #[test]
    fn test_new_job_defaults() {
        let job = Job::from_fn("index", |_| Ok(()));
        assert_eq!(job.name(), "index");
        assert_eq!(job.state(), JobState::None);
        assert_eq!(job.priority(), Priority::Long);
        assert!(job.rule().is_none());
        assert!(job.result().is_none());
        assert!(!job.is_system());
        assert!(!job.is_user());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Job::from_fn("a", |_| Ok(()));
        let b = Job::from_fn("a", |_| Ok(()));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Interactive < Priority::Short);
        assert!(Priority::Long < Priority::Build);
        assert!(Priority::Build < Priority::Decorate);
        assert_eq!(Priority::Long as i32, 30);
    }

    #[test]
    fn test_families_and_properties() {
        let job = Job::from_fn("fetch", |_| Ok(()));
        job.add_family("network");
        assert!(job.belongs_to("network"));
        assert!(!job.belongs_to("build"));

        job.set_property("origin", Some("cli".to_string()));
        assert_eq!(job.property("origin").as_deref(), Some("cli"));
        job.set_property("origin", None);
        assert!(job.property("origin").is_none());
    }

    struct FamilyBody;

    impl JobBody for FamilyBody {
        fn run(&self, _monitor: &dyn ProgressMonitor) -> JobStatus {
            JobStatus::ok()
        }

        fn belongs_to(&self, family: &str) -> bool {
            family == "builtin"
        }
    }

    #[test]
    fn test_body_family() {
        let job = Job::new("custom", FamilyBody);
        assert!(job.belongs_to("builtin"));
        assert!(job.body().run(&NullProgressMonitor::new()).is_ok());
    }

    #[test]
    fn test_set_rule_requires_idle() {
        let job = Job::from_fn("write", |_| Ok(()));
        let rule: RuleRef = Arc::new(PathRule::new("/a"));
        job.set_rule(Some(rule)).unwrap();
        assert!(job.rule().is_some());

        job.sched().state = JobState::Waiting;
        let err = job.set_rule(None).unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotIdle(_)));
    }

    #[test]
    fn test_set_job_group_requires_idle() {
        let job = Job::from_fn("grouped", |_| Ok(()));
        let group = JobGroup::new("index", 1);
        job.set_job_group(Some(group.clone())).unwrap();
        assert_eq!(job.job_group(), Some(group));

        job.sched().state = JobState::Running;
        assert!(matches!(
            job.set_job_group(None),
            Err(SchedulerError::JobNotIdle(_))
        ));
    }

    #[test]
    fn test_fn_body_maps_errors() {
        let job = Job::from_fn("fail", |_| Err(JobError::failed("nope")));
        let status = job.body().run(&NullProgressMonitor::new());
        assert_eq!(status.message(), "nope");
    }
}
