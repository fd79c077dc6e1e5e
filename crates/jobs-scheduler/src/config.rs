//! Job manager configuration.
//!
//! Controls the size of the worker pool, how long idle workers linger,
//! how often blocked threads poll for cancellation, and how long
//! `shutdown` waits for running jobs.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the job manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of worker threads.
    /// Defaults to the available parallelism of the host when unset.
    #[serde(default)]
    pub worker_pool_size: Option<usize>,

    /// Milliseconds an idle worker waits for work before it exits.
    /// Defaults to 60 seconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Milliseconds between cancellation checks of threads blocked on a
    /// rule, a lock or a join. Defaults to 100.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Seconds `shutdown` waits for running jobs to return.
    /// Defaults to 30 seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Prefix of worker thread names.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_thread_name_prefix() -> String {
    "corejobs-worker".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Configuration with a fixed number of workers.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_pool_size: Some(workers),
            ..Default::default()
        }
    }

    /// Worker pool size after applying the parallelism default.
    pub fn effective_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Check the configuration for values the manager cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for a zero-sized pool, a zero
    /// poll interval, or an empty thread name prefix.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_pool_size == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "lock_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.worker_pool_size, None);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(config.effective_pool_size() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_workers() {
        let config = SchedulerConfig::with_workers(3);
        assert_eq!(config.effective_pool_size(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SchedulerConfig::with_workers(0);
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));

        let config = SchedulerConfig {
            lock_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            thread_name_prefix: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let parsed: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, SchedulerConfig::default());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = SchedulerConfig {
            worker_pool_size: Some(2),
            idle_timeout_ms: 500,
            lock_poll_interval_ms: 10,
            shutdown_timeout_secs: 5,
            thread_name_prefix: "test-worker".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
