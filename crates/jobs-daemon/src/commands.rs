//! Command implementations for `corejobs`.
//!
//! Handles:
//! - run: schedule a synthetic workload and report how it went
//! - stress: exercise deadlock avoidance with explicit locks
//! - config: print the effective settings

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task;
use tracing::{info, warn};

use jobs_scheduler::JobManager;

use crate::settings::Settings;
use crate::workload::{run_stress, RunOptions, RunSummary, StressOptions, StressSummary, Workload};

/// Load settings from every source and apply the CLI flags on top.
pub fn load_settings(
    config_path: Option<&Path>,
    log_level: Option<&str>,
    workers: Option<usize>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    settings
        .apply_overrides(log_level, workers)
        .context("Invalid command line override")?;
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

async fn shutdown_manager(manager: JobManager) -> Result<()> {
    task::spawn_blocking(move || manager.shutdown())
        .await
        .context("Shutdown task failed")
}

/// Run a synthetic workload until it finishes or Ctrl-C cancels it.
pub async fn run_workload(
    config_path: Option<&Path>,
    log_level: Option<&str>,
    workers: Option<usize>,
    options: RunOptions,
    json: bool,
) -> Result<()> {
    let settings = load_settings(config_path, log_level, workers)?;
    init_logging(&settings.log_level)?;
    info!(
        workers = settings.scheduler.effective_pool_size(),
        jobs = options.jobs,
        "Starting workload"
    );

    let manager = JobManager::new(settings.scheduler).context("Failed to create job manager")?;
    let workload = Arc::new(
        Workload::schedule(&manager, &options).context("Failed to schedule workload")?,
    );

    let waiter = workload.clone();
    let joined = task::spawn_blocking(move || waiter.wait());
    tokio::select! {
        result = joined => {
            result.context("Join task failed")?.context("Failed waiting for jobs")?;
        }
        _ = signal::ctrl_c() => {
            warn!("Interrupted, canceling remaining jobs");
            workload.cancel();
            let waiter = workload.clone();
            task::spawn_blocking(move || waiter.wait())
                .await
                .context("Join task failed")?
                .context("Failed waiting for canceled jobs")?;
        }
    }

    let summary = workload.summary();
    shutdown_manager(manager).await?;
    print_run_summary(&summary, json)
}

fn print_run_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Workload finished in {} ms", summary.elapsed_ms);
    println!("  Started:   {}", summary.started_at.to_rfc3339());
    println!("  Finished:  {}", summary.finished_at.to_rfc3339());
    println!("  Jobs:      {}", summary.jobs);
    println!("  OK:        {}", summary.ok);
    println!("  Canceled:  {}", summary.canceled);
    println!("  Failed:    {}", summary.failed);
    println!("  Overlaps:  {}", summary.overlaps);
    println!("  Progress:  {:.0}%", summary.progress * 100.0);
    println!(
        "  Locks:     {} acquired, {} waited, {} deadlocks resolved",
        summary.locks.acquisitions, summary.locks.waits, summary.locks.deadlocks_resolved
    );
    Ok(())
}

/// Run the lock stress test.
pub async fn stress_locks(
    config_path: Option<&Path>,
    log_level: Option<&str>,
    options: StressOptions,
    json: bool,
) -> Result<()> {
    // Every stress job needs its own worker to contend for the locks.
    let settings = load_settings(config_path, log_level, Some(options.threads.max(1)))?;
    init_logging(&settings.log_level)?;

    let manager = JobManager::new(settings.scheduler).context("Failed to create job manager")?;
    let stress_manager = manager.clone();
    let summary = task::spawn_blocking(move || run_stress(&stress_manager, &options))
        .await
        .context("Stress task failed")?
        .context("Stress run failed")?;
    shutdown_manager(manager).await?;
    print_stress_summary(&summary, json)
}

fn print_stress_summary(summary: &StressSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Stress run finished in {} ms", summary.elapsed_ms);
    println!("  Started:            {}", summary.started_at.to_rfc3339());
    println!("  Jobs:               {}", summary.threads);
    println!("  Rounds completed:   {}", summary.rounds_completed);
    println!("  Acquisitions:       {}", summary.locks.acquisitions);
    println!("  Waits:              {}", summary.locks.waits);
    println!("  Deadlocks resolved: {}", summary.locks.deadlocks_resolved);
    Ok(())
}

/// Print the effective settings as TOML.
pub fn show_config(config_path: Option<&Path>, log_level: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level, None)?;
    let text = toml::to_string_pretty(&settings).context("Failed to render settings")?;
    print!("{}", text);
    Ok(())
}
