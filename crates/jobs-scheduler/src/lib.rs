//! Cooperative job scheduler.
//!
//! A [`JobManager`] runs [`Job`]s on a bounded pool of worker threads.
//! Jobs are queued by [`Priority`], may be delayed or put to sleep, and may
//! carry a scheduling rule: two jobs whose rules conflict never run at the
//! same time. Rules and explicit locks are arbitrated by a deadlock-free
//! lock manager shared with client threads.
//!
//! Cancellation is cooperative. Canceling a running job only cancels its
//! progress monitor; the body is expected to poll it and return.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use jobs_scheduler::{Job, JobManager, SchedulerConfig, Severity};
//!
//! let manager = JobManager::new(SchedulerConfig::default()).unwrap();
//! let job = Job::from_fn("hello", |monitor| {
//!     monitor.begin_task("greet", Some(1));
//!     monitor.worked(1);
//!     Ok(())
//! });
//! manager.schedule(&job, Duration::ZERO).unwrap();
//! assert!(manager.join(&job, None, None).unwrap());
//! assert_eq!(job.result().unwrap().severity(), Severity::Ok);
//! manager.shutdown();
//! ```

mod config;
mod error;
mod group;
mod implicit;
mod job;
mod listener;
mod manager;
mod provider;
mod queue;
mod status;
mod worker;

pub use config::SchedulerConfig;
pub use error::{JobError, SchedulerError};
pub use group::JobGroup;
pub use implicit::RuleGuard;
pub use job::{Job, JobBody, JobState, Priority};
pub use listener::{JobChangeEvent, JobChangeListener};
pub use manager::JobManager;
pub use provider::{NullProgressProvider, ProgressProvider};
pub use status::{JobStatus, Severity};
