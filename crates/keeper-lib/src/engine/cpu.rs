//! Duty-cycling CPU load
//!
//! Each worker thread spins on a private counter and sleeps for a fixed
//! millisecond every `intensity` iterations. The intensity is the only
//! state shared between workers and is read lock-free on every iteration.

use super::LoadEngine;
use crate::models::Resource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Busy iterations per sleep at process start
pub const INITIAL_INTENSITY: u64 = 10_000;

/// Worker count used when the core count cannot be determined
pub const DEFAULT_WORKERS: usize = 4;

/// Pause taken once per duty cycle
const SLEEP_TIME: Duration = Duration::from_millis(1);

const INCREASE_FACTOR: f64 = 1.001;
const DECREASE_FACTOR: f64 = 0.999;

/// Handles of a running pool
struct RunState {
    cancel: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

/// CPU load engine backed by one duty-cycling thread per core
pub struct CpuLoadEngine {
    intensity: Arc<AtomicU64>,
    state: Mutex<Option<RunState>>,
    worker_count: usize,
}

impl CpuLoadEngine {
    /// Create an engine sized to the available cores
    pub fn new() -> Self {
        let worker_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_WORKERS);
        Self::with_workers(worker_count)
    }

    /// Create an engine with an explicit pool size
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            intensity: Arc::new(AtomicU64::new(INITIAL_INTENSITY)),
            state: Mutex::new(None),
            worker_count: worker_count.max(1),
        }
    }

    /// Spawn the worker pool. Calling while already running is a no-op.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.is_some() {
            debug!("CPU load engine already running");
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(self.worker_count);

        for id in 0..self.worker_count {
            let cancel = Arc::clone(&cancel);
            let intensity = Arc::clone(&self.intensity);
            let spawned = thread::Builder::new()
                .name(format!("cpu-load-{id}"))
                .spawn(move || duty_cycle(&intensity, &cancel));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(worker = id, error = %e, "Failed to spawn CPU load worker"),
            }
        }

        info!(
            workers = workers.len(),
            intensity = self.current_intensity(),
            "CPU load engine started"
        );
        *state = Some(RunState { cancel, workers });
    }

    /// Cancel every worker and wait for all of them to exit
    pub fn stop(&self) {
        let mut state = self.lock_state();
        let Some(run) = state.take() else {
            return;
        };

        run.cancel.store(true, Ordering::Relaxed);
        let count = run.workers.len();
        for handle in run.workers {
            if handle.join().is_err() {
                warn!("CPU load worker panicked");
            }
        }
        info!(workers = count, "CPU load engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Number of live worker threads (zero when stopped)
    pub fn running_workers(&self) -> usize {
        self.lock_state()
            .as_ref()
            .map(|run| run.workers.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Configured pool size
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Scale the intensity by 0.1% up or down and return the new value
    pub fn adjust_step(&self, increase: bool) -> u64 {
        let previous = self
            .intensity
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(next_intensity(current, increase))
            })
            .unwrap_or_else(|current| current);
        next_intensity(previous, increase)
    }

    pub fn current_intensity(&self) -> u64 {
        self.intensity.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<RunState>> {
        // Handles stay valid even if a previous holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CpuLoadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpuLoadEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LoadEngine for CpuLoadEngine {
    fn resource(&self) -> Resource {
        Resource::Cpu
    }

    fn step(&self, increase: bool) -> u64 {
        self.adjust_step(increase)
    }

    fn level(&self) -> u64 {
        self.current_intensity()
    }
}

/// Multiplicative step, truncated. Increases always move by at least one.
fn next_intensity(current: u64, increase: bool) -> u64 {
    if increase {
        let scaled = (current as f64 * INCREASE_FACTOR) as u64;
        scaled.max(current.saturating_add(1))
    } else {
        let scaled = (current as f64 * DECREASE_FACTOR) as u64;
        scaled.max(1)
    }
}

fn duty_cycle(intensity: &AtomicU64, cancel: &AtomicBool) {
    let mut counter: u64 = 0;
    while !cancel.load(Ordering::Relaxed) {
        counter = counter.wrapping_add(1);
        let every = intensity.load(Ordering::Relaxed).max(1);
        if counter % every == 0 {
            thread::sleep(SLEEP_TIME);
        }
    }
}
