//! Error types for the scheduler crate.
//!
//! `SchedulerError` covers client programming errors returned at the call
//! site. `JobError` is what a job body returns when it cannot finish; the
//! worker turns it into a `JobStatus`.

use jobs_locks::LockError;
use jobs_rules::RuleError;
use thiserror::Error;

/// Errors returned by job manager operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Rule breaks the rule contract
    #[error("Invalid scheduling rule: {0}")]
    InvalidRule(#[from] RuleError),

    /// Nested rule is not contained by the rule the thread already holds
    #[error("Attempted to begin a rule that does not match the outer scope: {0}")]
    RuleNotContained(String),

    /// Rule being ended is not the most recently begun one
    #[error("Attempted to end a rule that was not begun: {0}")]
    EndRuleMismatch(String),

    /// Job property can only change while the job is not scheduled
    #[error("Job is not idle: {0}")]
    JobNotIdle(String),

    /// Thread tried to join the job it is running
    #[error("Cannot join a job from within itself: {0}")]
    JoinSelf(String),

    /// Joined job waits for a rule the calling thread holds
    #[error("Deadlock detected joining job: {0}")]
    JoinDeadlock(String),

    /// Operation must be called from the body of a running job
    #[error("Not called from a running job: {0}")]
    NotInJob(String),

    /// Job tried to yield its rule while inside a rule it began itself
    #[error("Cannot yield a rule while inside a nested rule: {0}")]
    YieldInNestedRule(String),

    /// Blocking call gave up because its progress monitor was canceled
    #[error("Operation canceled")]
    Canceled,

    /// Job manager no longer accepts work
    #[error("Job manager has been shut down")]
    ShutDown,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from the lock manager
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

/// Why a job body did not complete normally.
#[derive(Debug, Error)]
pub enum JobError {
    /// Body observed cancellation and stopped
    #[error("Job canceled")]
    Canceled,

    /// Body failed
    #[error("Job failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl JobError {
    pub fn failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        JobError::Failed(err.into())
    }
}

impl From<SchedulerError> for JobError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Canceled => JobError::Canceled,
            other => JobError::Failed(Box::new(other)),
        }
    }
}
