//! Job results.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::job::JobInner;
use crate::{Job, JobError};

/// Severity of a [`JobStatus`], from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    /// The job stopped because it was canceled. Not a failure.
    Cancel,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Ok => "OK",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

/// Immutable outcome of one job run.
///
/// Holds a weak reference to the job it belongs to, so keeping a status
/// around does not keep the job alive.
#[derive(Clone)]
pub struct JobStatus {
    severity: Severity,
    message: String,
    error: Option<Arc<dyn Error + Send + Sync>>,
    job: Weak<JobInner>,
}

impl JobStatus {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            error: None,
            job: Weak::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(Severity::Ok, "OK")
    }

    pub fn cancel() -> Self {
        Self::new(Severity::Cancel, "Canceled")
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Attach the error that caused this status.
    pub fn with_error(mut self, error: impl Error + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    /// Status for the outcome of a job body.
    pub fn from_result(result: Result<(), JobError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(JobError::Canceled) => Self::cancel(),
            Err(JobError::Failed(error)) => Self {
                message: error.to_string(),
                error: Some(Arc::from(error)),
                ..Self::new(Severity::Error, "")
            },
        }
    }

    pub(crate) fn attach(mut self, job: &Job) -> Self {
        self.job = job.downgrade();
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_source(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error.as_deref()
    }

    /// The job this status was produced for, if it still exists.
    pub fn job(&self) -> Option<Job> {
        self.job.upgrade().map(Job::from_inner)
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    pub fn is_canceled(&self) -> bool {
        self.severity == Severity::Cancel
    }
}

impl fmt::Debug for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStatus")
            .field("severity", &self.severity)
            .field("message", &self.message)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_constructors() {
        assert!(JobStatus::ok().is_ok());
        assert!(JobStatus::cancel().is_canceled());
        assert_eq!(JobStatus::info("i").severity(), Severity::Info);
        assert_eq!(JobStatus::warning("w").severity(), Severity::Warning);
        assert_eq!(JobStatus::error("e").message(), "e");
        assert!(JobStatus::ok().job().is_none());
    }

    #[test]
    fn test_from_result() {
        assert!(JobStatus::from_result(Ok(())).is_ok());
        assert!(JobStatus::from_result(Err(JobError::Canceled)).is_canceled());

        let status = JobStatus::from_result(Err(JobError::failed(io::Error::other("boom"))));
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(status.message(), "boom");
        assert!(status.error_source().is_some());
    }

    #[test]
    fn test_with_error_and_display() {
        let status = JobStatus::error("copy failed").with_error(io::Error::other("disk full"));
        assert_eq!(status.to_string(), "ERROR: copy failed");
        assert!(format!("{:?}", status).contains("disk full"));
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Error < Severity::Cancel);
        assert_eq!(
            serde_json::to_string(&Severity::Cancel).unwrap(),
            "\"cancel\""
        );
    }

    #[test]
    fn test_status_does_not_keep_job_alive() {
        let job = Job::from_fn("short-lived", |_| Ok(()));
        let status = JobStatus::ok().attach(&job);
        assert_eq!(status.job().map(|j| j.id()), Some(job.id()));
        drop(job);
        assert!(status.job().is_none());
    }
}
