//! Lock manager for the cooperative job scheduler.
//!
//! Worker threads running jobs and client threads calling into the
//! scheduler hold two kinds of resources: explicit [`OrderedLock`]s and
//! scheduling rules. The [`LockManager`] keeps a wait-for graph of who
//! holds what and who waits for whom, and never lets a wait close a cycle
//! through an explicit lock: when one would, a thread on the cycle is forced
//! to give back the locks that cause it and re-acquire them afterwards.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jobs_locks::LockManager;
//!
//! let manager = Arc::new(LockManager::new());
//! let lock = manager.new_lock();
//! {
//!     let _guard = lock.lock();
//!     assert!(manager.is_lock_owner());
//! }
//! assert!(manager.is_empty());
//! ```

mod error;
mod graph;
mod listener;
mod manager;
mod ordered;
mod resource;

pub use error::LockError;
pub use listener::LockListener;
pub use manager::{AcquireOutcome, LockManager, LockStats, DEFAULT_POLL_INTERVAL};
pub use ordered::{LockGuard, OrderedLock};
pub use resource::{LockId, Resource};
