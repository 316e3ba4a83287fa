//! Load keeper - holds a host at a drifting baseline CPU and memory load
//!
//! Runs duty-cycled CPU workers and a memory balloon, and steers both
//! toward the configured peak usage until interrupted.

use anyhow::{Context, Result};
use keeper_lib::{
    control::resolve_peak_usage, ControlLoopBuilder, CpuLoadEngine, EventSink, MemoryLoadEngine,
    ProcStatsProvider, StartupSummary, StatsProvider, StructuredLogger, SystemStats, UsagePlan,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting loadkeeper");

    let config = config::KeeperConfig::load()?;
    let logger = Arc::new(StructuredLogger::new(&config.node_name));

    let (peak_usage, warning) = resolve_peak_usage(config.peak_usage.as_deref());
    if let Some(err) = &warning {
        logger.config_fallback(err, peak_usage);
    }
    let plan = Arc::new(UsagePlan::new(peak_usage));

    let provider = Arc::new(ProcStatsProvider::with_proc_path(&config.proc_path));
    let cpu = Arc::new(CpuLoadEngine::new());
    let memory = Arc::new(MemoryLoadEngine::new());

    let initial_stats = match provider.snapshot().await {
        Ok(stats) => {
            memory.set_total_memory(stats.total_memory_bytes);
            stats
        }
        Err(e) => {
            logger.stats_fallback(&e);
            SystemStats::default()
        }
    };

    logger.startup(&StartupSummary {
        peak_usage_origin: plan.origin(),
        peak_usage: plan.current(),
        cpu_workers: cpu.worker_count(),
        total_memory_bytes: initial_stats.total_memory_bytes,
    });

    cpu.start();

    let control = ControlLoopBuilder::new()
        .provider(provider)
        .sink(logger.clone())
        .cpu_engine(cpu.clone())
        .memory_engine(memory)
        .plan(plan)
        .initial_stats(initial_stats)
        .config(config.loop_config())
        .build()
        .context("Failed to build control loop")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let control_handle = tokio::spawn(control.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    control_handle.await.context("Control loop panicked")?;
    tokio::task::spawn_blocking(move || cpu.stop())
        .await
        .context("Failed to stop CPU workers")?;

    info!("Shutdown complete");
    Ok(())
}
