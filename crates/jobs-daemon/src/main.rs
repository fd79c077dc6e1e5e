//! corejobs
//!
//! Drives the cooperative job scheduler with synthetic workloads.
//!
//! # Usage
//!
//! ```bash
//! corejobs run [--jobs N] [--projects N] [--workers N] [--seed S] [--json]
//! corejobs stress [--threads N] [--locks N] [--rounds N] [--json]
//! corejobs config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/corejobs/config.toml)
//! 3. File given with --config
//! 4. Environment variables (COREJOBS_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use jobs_daemon::{run_workload, show_config, stress_locks, Cli, Commands, RunOptions, StressOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Run {
            jobs,
            projects,
            max_duration_ms,
            workers,
            seed,
            json,
        } => {
            let options = RunOptions {
                jobs,
                projects,
                max_duration_ms,
                seed,
            };
            run_workload(config, log_level, workers, options, json).await?;
        }
        Commands::Stress {
            threads,
            locks,
            rounds,
            seed,
            json,
        } => {
            let options = StressOptions {
                threads,
                locks,
                rounds,
                seed,
            };
            stress_locks(config, log_level, options, json).await?;
        }
        Commands::Config => {
            show_config(config, log_level)?;
        }
    }

    Ok(())
}
