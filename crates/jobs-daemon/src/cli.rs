//! CLI argument parsing for `corejobs`.
//!
//! Flags given here override every configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cooperative job scheduler driver
///
/// Runs synthetic workloads against the job manager and its lock manager.
#[derive(Parser, Debug)]
#[command(name = "corejobs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/corejobs/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schedule a batch of jobs over overlapping path rules and wait for them
    Run {
        /// Number of jobs to schedule
        #[arg(short, long, default_value = "16")]
        jobs: usize,

        /// Number of top-level projects the job rules are spread over
        #[arg(short, long, default_value = "3")]
        projects: usize,

        /// Longest simulated job duration in milliseconds
        #[arg(long, default_value = "200")]
        max_duration_ms: u64,

        /// Override the worker pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seed for the random workload
        #[arg(long)]
        seed: Option<u64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Take explicit locks in random order from several jobs at once
    Stress {
        /// Concurrent jobs taking locks
        #[arg(short, long, default_value = "3")]
        threads: usize,

        /// Number of locks shared by the jobs
        #[arg(long, default_value = "3")]
        locks: usize,

        /// Lock rounds per job
        #[arg(short, long, default_value = "50")]
        rounds: usize,

        /// Seed for the lock orders
        #[arg(long)]
        seed: Option<u64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}
