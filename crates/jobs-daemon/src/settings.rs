//! Layered settings for the `corejobs` binary.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `~/.config/corejobs/config.toml`
//! 3. The file given with `--config`
//! 4. `COREJOBS_*` environment variables
//! 5. CLI flags, applied by the caller through [`Settings::apply_overrides`]

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use directories::ProjectDirs;
use jobs_scheduler::{SchedulerConfig, SchedulerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A source could not be read or parsed
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Values were read but are unusable
    #[error("Invalid settings: {0}")]
    Invalid(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Location of the per-user config file, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "corejobs").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Settings {
    /// Load settings from every source but CLI flags.
    ///
    /// Environment variables use `__` between nesting levels, for example
    /// `COREJOBS_SCHEDULER__WORKER_POOL_SIZE=4`.
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_from(default_config_path().as_deref(), cli_config_path)
    }

    /// [`load`](Self::load) with an explicit location for the per-user file.
    pub fn load_from(
        user_config_path: Option<&Path>,
        cli_config_path: Option<&Path>,
    ) -> Result<Self, SettingsError> {
        let defaults = SchedulerConfig::default();
        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("scheduler.idle_timeout_ms", defaults.idle_timeout_ms)?
            .set_default(
                "scheduler.lock_poll_interval_ms",
                defaults.lock_poll_interval_ms,
            )?
            .set_default(
                "scheduler.shutdown_timeout_secs",
                defaults.shutdown_timeout_secs,
            )?
            .set_default("scheduler.thread_name_prefix", defaults.thread_name_prefix)?;

        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("COREJOBS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.scheduler.validate()?;
        Ok(settings)
    }

    /// Apply CLI flags, which take precedence over every other source.
    pub fn apply_overrides(
        &mut self,
        log_level: Option<&str>,
        workers: Option<usize>,
    ) -> Result<(), SettingsError> {
        if let Some(level) = log_level {
            self.log_level = level.to_string();
        }
        if let Some(workers) = workers {
            self.scheduler.worker_pool_size = Some(workers);
        }
        self.scheduler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_load_without_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        let settings = Settings::load_from(Some(&missing), None).unwrap();
        assert_eq!(settings.scheduler.idle_timeout_ms, 60_000);
        assert_eq!(settings.scheduler.thread_name_prefix, "corejobs-worker");
    }

    #[test]
    fn test_cli_file_overrides_user_file() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let cli = dir.path().join("cli.toml");
        fs::write(
            &user,
            "log_level = \"warn\"\n[scheduler]\nworker_pool_size = 2\nidle_timeout_ms = 500\n",
        )
        .unwrap();
        fs::write(&cli, "[scheduler]\nworker_pool_size = 6\n").unwrap();

        let settings = Settings::load_from(Some(&user), Some(&cli)).unwrap();
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.scheduler.worker_pool_size, Some(6));
        assert_eq!(settings.scheduler.idle_timeout_ms, 500);
    }

    #[test]
    fn test_missing_cli_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Settings::load_from(None, Some(&missing)).unwrap_err();
        assert!(matches!(err, SettingsError::Config(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let cli = dir.path().join("bad.toml");
        fs::write(&cli, "[scheduler]\nworker_pool_size = 0\n").unwrap();
        let err = Settings::load_from(None, Some(&cli)).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_apply_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(Some("debug"), Some(3)).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.scheduler.worker_pool_size, Some(3));
        assert!(settings.apply_overrides(None, Some(0)).is_err());
    }

    #[test]
    fn test_settings_toml_roundtrip() {
        let mut settings = Settings::default();
        settings.scheduler.worker_pool_size = Some(4);
        let text = toml::to_string_pretty(&settings).unwrap();
        let decoded: Settings = toml::from_str(&text).unwrap();
        assert_eq!(decoded, settings);
    }
}
