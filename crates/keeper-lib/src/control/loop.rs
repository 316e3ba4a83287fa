//! Sampling and control loop
//!
//! Three timers share one select point: the short sampling tick that runs
//! the controller for both resources, a compaction tick and the ceiling
//! drift tick. Each fire is handled to completion before the next event,
//! so adjustments are strictly serialized.

use super::controller::{AdaptiveController, ControlEvent};
use super::plan::{UsagePlan, DEFAULT_PEAK_USAGE};
use super::target::{is_night, target_percent};
use crate::engine::{CpuLoadEngine, LoadEngine, MemoryLoadEngine};
use crate::models::SystemStats;
use crate::observability::{EventSink, TickSummary};
use crate::stats::StatsProvider;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::info;

/// Timer periods for the control loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Snapshot and adjustment period (default: 3 seconds)
    pub sample_interval: Duration,
    /// Balloon compaction period (default: 1 minute)
    pub compaction_interval: Duration,
    /// Ceiling drift period (default: 5 minutes)
    pub drift_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(3),
            compaction_interval: Duration::from_secs(60),
            drift_interval: Duration::from_secs(300),
        }
    }
}

/// Control loop owning the engines it drives
pub struct ControlLoop {
    provider: Arc<dyn StatsProvider>,
    sink: Arc<dyn EventSink>,
    cpu: Arc<CpuLoadEngine>,
    memory: Arc<MemoryLoadEngine>,
    plan: Arc<UsagePlan>,
    controller: AdaptiveController,
    drift_rng: StdRng,
    config: LoopConfig,
    last_stats: SystemStats,
}

impl ControlLoop {
    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            sample_interval_ms = self.config.sample_interval.as_millis() as u64,
            compaction_interval_secs = self.config.compaction_interval.as_secs(),
            drift_interval_secs = self.config.drift_interval.as_secs(),
            "Starting control loop"
        );

        let start = Instant::now();
        let mut sample_ticker = interval_at(
            start + self.config.sample_interval,
            self.config.sample_interval,
        );
        let mut compaction_ticker = interval_at(
            start + self.config.compaction_interval,
            self.config.compaction_interval,
        );
        let mut drift_ticker = interval_at(
            start + self.config.drift_interval,
            self.config.drift_interval,
        );

        loop {
            tokio::select! {
                _ = sample_ticker.tick() => {
                    self.tick().await;
                }
                _ = compaction_ticker.tick() => {
                    self.compact();
                }
                _ = drift_ticker.tick() => {
                    self.drift();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }
    }

    /// One sampling pass at the current time
    pub async fn tick(&mut self) -> [ControlEvent; 2] {
        self.tick_at(Utc::now()).await
    }

    /// One sampling pass: refresh stats, recompute the target and run the
    /// controller for memory then CPU
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> [ControlEvent; 2] {
        match self.provider.snapshot().await {
            Ok(stats) => {
                if stats.total_memory_bytes > 0
                    && stats.total_memory_bytes != self.memory.total_memory()
                {
                    self.memory.set_total_memory(stats.total_memory_bytes);
                }
                self.last_stats = stats;
            }
            Err(e) => self.sink.stats_fallback(&e),
        }
        let stats = self.last_stats;

        let night = is_night(now);
        let target = target_percent(self.plan.current(), night);

        self.sink.tick(&TickSummary {
            stats,
            target_percent: target,
            night,
            balloon_bytes: self.memory.current_bytes(),
            cpu_intensity: self.cpu.current_intensity(),
        });

        let memory = self.adjust(self.memory.clone(), stats.memory_percent, target);
        let cpu = self.adjust(self.cpu.clone(), stats.cpu_percent, target);
        [memory, cpu]
    }

    fn adjust(&mut self, engine: Arc<dyn LoadEngine>, measured: f64, target: f64) -> ControlEvent {
        let event = self.controller.run_pass(engine.as_ref(), measured, target);
        self.sink.control(&event);
        event
    }

    /// Release spare balloon capacity
    pub fn compact(&self) -> usize {
        let freed = self.memory.compact();
        self.sink.compaction(freed, self.memory.current_bytes());
        freed
    }

    /// Re-sample the usage ceiling
    pub fn drift(&mut self) {
        let outcome = self.plan.drift(&mut self.drift_rng);
        self.sink.drift(&outcome);
    }

    /// Snapshot the next tick falls back to
    pub fn last_stats(&self) -> SystemStats {
        self.last_stats
    }
}

/// Builder for creating the control loop
pub struct ControlLoopBuilder {
    provider: Option<Arc<dyn StatsProvider>>,
    sink: Option<Arc<dyn EventSink>>,
    cpu: Option<Arc<CpuLoadEngine>>,
    memory: Option<Arc<MemoryLoadEngine>>,
    plan: Option<Arc<UsagePlan>>,
    seed: Option<u64>,
    initial_stats: SystemStats,
    config: LoopConfig,
}

impl ControlLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            provider: None,
            sink: None,
            cpu: None,
            memory: None,
            plan: None,
            seed: None,
            initial_stats: SystemStats::default(),
            config: LoopConfig::default(),
        }
    }

    /// Set the stats provider
    pub fn provider(mut self, provider: Arc<dyn StatsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the event sink
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cpu_engine(mut self, cpu: Arc<CpuLoadEngine>) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn memory_engine(mut self, memory: Arc<MemoryLoadEngine>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn plan(mut self, plan: Arc<UsagePlan>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Seed both random sources for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Snapshot used until the first successful read
    pub fn initial_stats(mut self, stats: SystemStats) -> Self {
        self.initial_stats = stats;
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sampling interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set the compaction interval
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    /// Set the drift interval
    pub fn drift_interval(mut self, interval: Duration) -> Self {
        self.config.drift_interval = interval;
        self
    }

    /// Build the control loop
    pub fn build(self) -> Result<ControlLoop> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Stats provider is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Event sink is required"))?;

        if self.config.sample_interval.is_zero()
            || self.config.compaction_interval.is_zero()
            || self.config.drift_interval.is_zero()
        {
            anyhow::bail!("Loop intervals must be non-zero");
        }

        let (controller, drift_rng) = match self.seed {
            Some(seed) => (
                AdaptiveController::with_rng(StdRng::seed_from_u64(seed)),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (AdaptiveController::new(), StdRng::from_entropy()),
        };

        Ok(ControlLoop {
            provider,
            sink,
            cpu: self.cpu.unwrap_or_default(),
            memory: self.memory.unwrap_or_default(),
            plan: self
                .plan
                .unwrap_or_else(|| Arc::new(UsagePlan::new(DEFAULT_PEAK_USAGE))),
            controller,
            drift_rng,
            config: self.config,
            last_stats: self.initial_stats,
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ConfigError, Decision, DriftOutcome, HARD_CEILING_PERCENT};
    use crate::models::Resource;
    use crate::observability::StartupSummary;
    use crate::stats::StatsError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Provider replaying scripted snapshots; `None` entries fail
    struct ScriptedProvider {
        script: Mutex<VecDeque<Option<SystemStats>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Option<SystemStats>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl StatsProvider for ScriptedProvider {
        async fn snapshot(&self) -> Result<SystemStats, StatsError> {
            let next = self.script.lock().unwrap().pop_front().flatten();
            next.ok_or_else(|| StatsError::Malformed {
                source_name: "script",
                reason: "no snapshot".to_string(),
            })
        }
    }

    /// Sink recording event kinds
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
        controls: Mutex<Vec<ControlEvent>>,
    }

    impl RecordingSink {
        fn count(&self, kind: &str) -> usize {
            self.events.lock().unwrap().iter().filter(|e| *e == kind).count()
        }

        fn push(&self, kind: &str) {
            self.events.lock().unwrap().push(kind.to_string());
        }
    }

    impl EventSink for RecordingSink {
        fn startup(&self, _summary: &StartupSummary) {
            self.push("startup");
        }

        fn config_fallback(&self, _error: &ConfigError, _peak_usage: u32) {
            self.push("config_fallback");
        }

        fn tick(&self, _summary: &TickSummary) {
            self.push("tick");
        }

        fn control(&self, event: &ControlEvent) {
            self.push("control");
            self.controls.lock().unwrap().push(*event);
        }

        fn stats_fallback(&self, _error: &StatsError) {
            self.push("stats_fallback");
        }

        fn compaction(&self, _freed_slots: usize, _balloon_bytes: u64) {
            self.push("compaction");
        }

        fn drift(&self, _outcome: &DriftOutcome) {
            self.push("drift");
        }

        fn shutdown(&self, _reason: &str) {
            self.push("shutdown");
        }
    }

    fn stats(cpu_percent: f64, memory_percent: f64) -> SystemStats {
        SystemStats {
            cpu_percent,
            memory_percent,
            total_memory_bytes: 10 * GIB,
            used_memory_bytes: (memory_percent / 100.0 * (10 * GIB) as f64) as u64,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn build(
        script: Vec<Option<SystemStats>>,
        sink: Arc<RecordingSink>,
        memory: Arc<MemoryLoadEngine>,
        cpu: Arc<CpuLoadEngine>,
    ) -> ControlLoop {
        ControlLoopBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(script)))
            .sink(sink)
            .memory_engine(memory)
            .cpu_engine(cpu)
            .plan(Arc::new(UsagePlan::new(40)))
            .seed(42)
            .build()
            .unwrap()
    }

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.sample_interval, Duration::from_secs(3));
        assert_eq!(config.compaction_interval, Duration::from_secs(60));
        assert_eq!(config.drift_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_missing_provider() {
        let result = ControlLoopBuilder::new()
            .sink(Arc::new(RecordingSink::default()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = ControlLoopBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .sink(Arc::new(RecordingSink::default()))
            .sample_interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tick_runs_memory_then_cpu() {
        let sink = Arc::new(RecordingSink::default());
        let mut control = build(
            vec![Some(stats(10.0, 20.0))],
            sink.clone(),
            Arc::new(MemoryLoadEngine::with_total_memory(10 * GIB)),
            Arc::new(CpuLoadEngine::with_workers(1)),
        );

        let [memory, cpu] = control.tick_at(noon()).await;

        assert_eq!(memory.resource, Resource::Memory);
        assert_eq!(cpu.resource, Resource::Cpu);
        assert_eq!(memory.measured_percent, 20.0);
        assert_eq!(cpu.measured_percent, 10.0);
        // ceiling 40 by day
        assert_eq!(memory.target_percent, 32.0);
        assert_eq!(sink.count("tick"), 1);
        assert_eq!(sink.count("control"), 2);
    }

    #[tokio::test]
    async fn test_night_tick_targets_full_ceiling() {
        let sink = Arc::new(RecordingSink::default());
        let mut control = build(
            vec![Some(stats(10.0, 20.0))],
            sink,
            Arc::new(MemoryLoadEngine::new()),
            Arc::new(CpuLoadEngine::with_workers(1)),
        );

        let night = Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap();
        let [memory, _] = control.tick_at(night).await;

        assert_eq!(memory.target_percent, 40.0);
    }

    #[tokio::test]
    async fn test_failed_snapshot_reuses_previous() {
        let sink = Arc::new(RecordingSink::default());
        let mut control = build(
            vec![Some(stats(12.0, 25.0)), None],
            sink.clone(),
            Arc::new(MemoryLoadEngine::new()),
            Arc::new(CpuLoadEngine::with_workers(1)),
        );

        control.tick_at(noon()).await;
        let [memory, cpu] = control.tick_at(noon()).await;

        assert_eq!(sink.count("stats_fallback"), 1);
        assert_eq!(memory.measured_percent, 25.0);
        assert_eq!(cpu.measured_percent, 12.0);
        assert_eq!(control.last_stats(), stats(12.0, 25.0));
    }

    #[tokio::test]
    async fn test_over_hard_ceiling_forces_both_down() {
        let sink = Arc::new(RecordingSink::default());
        let memory = Arc::new(MemoryLoadEngine::with_total_memory(10 * GIB));
        let cpu = Arc::new(CpuLoadEngine::with_workers(1));
        memory.adjust_step(true);
        memory.adjust_step(true);

        let over = HARD_CEILING_PERCENT + 5.0;
        let mut control = build(
            vec![Some(stats(over, over))],
            sink,
            memory.clone(),
            cpu.clone(),
        );

        let [mem_event, cpu_event] = control.tick_at(noon()).await;

        assert_eq!(mem_event.decision, Decision::Forced);
        assert_eq!(cpu_event.decision, Decision::Forced);
        assert_eq!(memory.block_count(), 10);
        assert_eq!(cpu.current_intensity(), 9_990);
    }

    #[tokio::test]
    async fn test_levels_follow_decisions() {
        let sink = Arc::new(RecordingSink::default());
        let memory = Arc::new(MemoryLoadEngine::with_total_memory(10 * GIB));
        let mut control = build(
            vec![Some(stats(5.0, 5.0)); 20],
            sink.clone(),
            memory.clone(),
            Arc::new(CpuLoadEngine::with_workers(1)),
        );

        for _ in 0..20 {
            control.tick_at(noon()).await;
        }

        let mut expected_blocks = 0usize;
        for event in sink.controls.lock().unwrap().iter() {
            if event.resource != Resource::Memory {
                continue;
            }
            match event.decision.direction() {
                Some(true) => expected_blocks += 10,
                Some(false) => expected_blocks = expected_blocks.saturating_sub(10),
                None => assert_eq!(event.level, None),
            }
        }
        assert_eq!(memory.block_count(), expected_blocks);
    }

    #[tokio::test]
    async fn test_tick_learns_total_memory() {
        let sink = Arc::new(RecordingSink::default());
        let memory = Arc::new(MemoryLoadEngine::new());
        let mut control = build(
            vec![Some(stats(10.0, 10.0))],
            sink,
            memory.clone(),
            Arc::new(CpuLoadEngine::with_workers(1)),
        );

        control.tick_at(noon()).await;

        assert_eq!(memory.total_memory(), 10 * GIB);
    }

    #[tokio::test]
    async fn test_compact_and_drift_emit_events() {
        let sink = Arc::new(RecordingSink::default());
        let plan = Arc::new(UsagePlan::new(40));
        let mut control = ControlLoopBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .sink(sink.clone())
            .plan(plan.clone())
            .seed(3)
            .build()
            .unwrap();

        control.compact();
        control.drift();

        assert_eq!(sink.count("compaction"), 1);
        assert_eq!(sink.count("drift"), 1);
        assert!((8..=40).contains(&plan.current()));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let control = ControlLoopBuilder::new()
            .provider(Arc::new(ScriptedProvider::new(vec![
                Some(stats(10.0, 10.0));
                100
            ])))
            .sink(sink.clone())
            .memory_engine(Arc::new(MemoryLoadEngine::new()))
            .cpu_engine(Arc::new(CpuLoadEngine::with_workers(1)))
            .sample_interval(Duration::from_millis(10))
            .compaction_interval(Duration::from_millis(25))
            .drift_interval(Duration::from_millis(40))
            .seed(5)
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(sink.count("tick") >= 2);
        assert_eq!(sink.count("control"), 2 * sink.count("tick"));
        assert!(sink.count("compaction") >= 1);
        assert!(sink.count("drift") >= 1);
    }
}
