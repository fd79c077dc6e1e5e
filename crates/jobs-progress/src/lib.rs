//! Progress monitors for the cooperative job scheduler.
//!
//! A progress monitor is a cancellable handle a running job reports its
//! progress through. Monitors form a tree: a parent hands a fixed number of
//! its ticks to a child monitor, and the child converts whatever granularity
//! its own task uses back into the parent's ticks.
//!
//! # Monitor Types
//!
//! - [`NullProgressMonitor`]: reports nothing, only tracks cancellation
//! - [`TrackingProgressMonitor`]: records task, sub task and cumulative ticks
//! - [`SubProgressMonitor`]: a child with a fixed parent allotment
//! - [`InfiniteSubProgressMonitor`]: a child for tasks of unknown length whose
//!   reporting granularity decays logarithmically so it never overshoots
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jobs_progress::{ProgressMonitor, SubProgressMonitor, TrackingProgressMonitor};
//!
//! let root = Arc::new(TrackingProgressMonitor::new());
//! root.begin_task("sync", Some(10));
//!
//! let child = SubProgressMonitor::new(root.clone(), 10);
//! child.begin_task("fetch", Some(100));
//! for _ in 0..100 {
//!     child.worked(1);
//! }
//! child.done();
//!
//! assert!((root.snapshot().worked - 10.0).abs() < 1e-9);
//! ```

mod infinite;
mod monitor;
mod sub;
mod tracking;

pub use infinite::InfiniteSubProgressMonitor;
pub use monitor::{NullProgressMonitor, ProgressMonitor};
pub use sub::{SubMonitorStyle, SubProgressMonitor};
pub use tracking::{ProgressSnapshot, TrackingProgressMonitor};
