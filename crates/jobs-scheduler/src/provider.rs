//! Pluggable progress monitor factory.

use std::sync::Arc;

use jobs_progress::{NullProgressMonitor, ProgressMonitor, SubProgressMonitor};

use crate::Job;

/// Supplies the progress monitors jobs run with.
///
/// A manager has exactly one provider at a time. It is given at
/// construction and can be swapped with
/// [`JobManager::with_progress_provider`](crate::JobManager::with_progress_provider)
/// or [`JobManager::replace_progress_provider`](crate::JobManager::replace_progress_provider).
pub trait ProgressProvider: Send + Sync {
    /// Monitor for a job that has no progress group.
    fn create_monitor(&self, job: &Job) -> Arc<dyn ProgressMonitor>;

    /// Monitor for a job reporting `ticks` of work into `group`.
    fn create_monitor_in_group(
        &self,
        job: &Job,
        group: Arc<dyn ProgressMonitor>,
        ticks: u32,
    ) -> Arc<dyn ProgressMonitor> {
        let _ = job;
        Arc::new(SubProgressMonitor::new(group, ticks))
    }

    /// Monitor that several jobs can report into together.
    fn create_progress_group(&self) -> Arc<dyn ProgressMonitor> {
        self.default_monitor()
    }

    /// Monitor used when a caller has none.
    fn default_monitor(&self) -> Arc<dyn ProgressMonitor> {
        Arc::new(NullProgressMonitor::new())
    }

    /// `monitor` if present, otherwise a default monitor.
    fn monitor_for(&self, monitor: Option<Arc<dyn ProgressMonitor>>) -> Arc<dyn ProgressMonitor> {
        monitor.unwrap_or_else(|| self.default_monitor())
    }
}

/// Provider handing out monitors that only track cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressProvider;

impl ProgressProvider for NullProgressProvider {
    fn create_monitor(&self, _job: &Job) -> Arc<dyn ProgressMonitor> {
        Arc::new(NullProgressMonitor::new())
    }
}
