//! Library side of the `corejobs` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, stress, config)
//! - `settings`: Layered configuration
//! - `workload`: Synthetic workloads scheduled on the job manager

pub mod cli;
pub mod commands;
pub mod settings;
pub mod workload;

pub use cli::{Cli, Commands};
pub use commands::{init_logging, load_settings, run_workload, show_config, stress_locks};
pub use settings::{default_config_path, Settings, SettingsError};
pub use workload::{
    run_stress, RunOptions, RunSummary, StressOptions, StressSummary, Workload, RUN_FAMILY,
    STRESS_FAMILY,
};
