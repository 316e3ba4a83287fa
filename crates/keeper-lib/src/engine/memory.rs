//! Memory balloon
//!
//! The balloon is a stack of 1 MiB blocks. Every block is filled with a
//! byte pattern on allocation so the kernel has to commit its pages.

use super::LoadEngine;
use crate::models::Resource;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Size of one balloon block (1 MiB)
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// Step size as a fraction of total host memory (0.1%)
const STEP_DIVISOR: u64 = 1000;

/// Outcome of one memory adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStep {
    pub increased: bool,
    /// Balloon size after the step
    pub current_bytes: u64,
}

#[derive(Default)]
struct Balloon {
    blocks: Vec<Box<[u8]>>,
    total_memory: u64,
}

impl Balloon {
    fn bytes(&self) -> u64 {
        self.blocks.len() as u64 * BLOCK_SIZE
    }

    fn step_bytes(&self) -> u64 {
        if self.total_memory == 0 {
            return 0;
        }
        let whole_blocks = (self.total_memory / STEP_DIVISOR) / BLOCK_SIZE;
        whole_blocks.max(1) * BLOCK_SIZE
    }

    fn resize_to(&mut self, target_bytes: u64) {
        let current = self.bytes();
        if target_bytes > current {
            self.allocate(target_bytes - current);
        } else if target_bytes < current {
            self.release(current - target_bytes);
        }
    }

    fn allocate(&mut self, bytes: u64) {
        let blocks = bytes.div_ceil(BLOCK_SIZE);
        self.blocks.reserve(blocks as usize);
        for _ in 0..blocks {
            self.blocks.push(touched_block());
        }
    }

    fn release(&mut self, bytes: u64) {
        let blocks = (bytes.div_ceil(BLOCK_SIZE) as usize).min(self.blocks.len());
        let keep = self.blocks.len() - blocks;
        self.blocks.truncate(keep);
    }
}

/// Allocate one block and write every byte
fn touched_block() -> Box<[u8]> {
    (0..BLOCK_SIZE as usize)
        .map(|i| (i % 256) as u8)
        .collect::<Vec<u8>>()
        .into_boxed_slice()
}

/// Memory load engine holding the balloon behind a read/write lock
#[derive(Default)]
pub struct MemoryLoadEngine {
    balloon: RwLock<Balloon>,
}

impl MemoryLoadEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with a known host memory size
    pub fn with_total_memory(total_memory: u64) -> Self {
        let engine = Self::new();
        engine.set_total_memory(total_memory);
        engine
    }

    /// Set the host memory size the step is derived from
    pub fn set_total_memory(&self, total_memory: u64) {
        self.write().total_memory = total_memory;
    }

    pub fn total_memory(&self) -> u64 {
        self.read().total_memory
    }

    /// Bytes requested by one step: 0.1% of host memory in whole blocks
    pub fn step_bytes(&self) -> u64 {
        self.read().step_bytes()
    }

    /// Grow or shrink the balloon by one step
    pub fn adjust_step(&self, increase: bool) -> MemoryStep {
        let mut balloon = self.write();
        let current = balloon.bytes();
        let step = balloon.step_bytes();

        let target = if increase {
            current.saturating_add(step)
        } else {
            current.saturating_sub(step)
        };
        balloon.resize_to(target);

        let current_bytes = balloon.bytes();
        debug!(
            increase,
            step_bytes = step,
            current_bytes,
            blocks = balloon.blocks.len(),
            "Memory balloon adjusted"
        );

        MemoryStep {
            increased: increase,
            current_bytes,
        }
    }

    /// Current balloon size in bytes
    pub fn current_bytes(&self) -> u64 {
        self.read().bytes()
    }

    pub fn block_count(&self) -> usize {
        self.read().blocks.len()
    }

    /// Release spare capacity of the block table; returns freed slots
    pub fn compact(&self) -> usize {
        let mut balloon = self.write();
        let before = balloon.blocks.capacity();
        balloon.blocks.shrink_to_fit();
        before - balloon.blocks.capacity()
    }

    fn read(&self) -> RwLockReadGuard<'_, Balloon> {
        self.balloon.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Balloon> {
        self.balloon.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl LoadEngine for MemoryLoadEngine {
    fn resource(&self) -> Resource {
        Resource::Memory
    }

    fn step(&self, increase: bool) -> u64 {
        self.adjust_step(increase).current_bytes
    }

    fn level(&self) -> u64 {
        self.current_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_increase_on_ten_gib_host() {
        let engine = MemoryLoadEngine::with_total_memory(10 * GIB);

        let step = engine.adjust_step(true);

        assert!(step.increased);
        assert_eq!(step.current_bytes, 10_485_760);
        assert_eq!(engine.block_count(), 10);
        assert_eq!(engine.current_bytes(), 10_485_760);
    }

    #[test]
    fn test_decrease_clamps_at_zero() {
        let engine = MemoryLoadEngine::with_total_memory(10 * GIB);

        let step = engine.adjust_step(false);

        assert!(!step.increased);
        assert_eq!(step.current_bytes, 0);
        assert_eq!(engine.block_count(), 0);
    }

    #[test]
    fn test_unknown_total_memory_is_noop() {
        let engine = MemoryLoadEngine::new();
        assert_eq!(engine.adjust_step(true).current_bytes, 0);
    }

    #[test]
    fn test_small_host_steps_one_block() {
        let engine = MemoryLoadEngine::with_total_memory(512 * 1024 * 1024);
        assert_eq!(engine.step_bytes(), BLOCK_SIZE);
        assert_eq!(engine.adjust_step(true).current_bytes, BLOCK_SIZE);
    }

    #[test]
    fn test_blocks_are_touched() {
        let engine = MemoryLoadEngine::with_total_memory(GIB);
        engine.adjust_step(true);

        let balloon = engine.read();
        let block = &balloon.blocks[0];
        assert_eq!(block.len() as u64, BLOCK_SIZE);
        assert_eq!(block[0], 0);
        assert_eq!(block[255], 255);
        assert_eq!(block[256], 0);
        assert_eq!(block[1000], (1000 % 256) as u8);
    }

    #[test]
    fn test_allocation_rounds_up_to_block() {
        let mut balloon = Balloon::default();
        balloon.resize_to(BLOCK_SIZE + 1);
        assert_eq!(balloon.blocks.len(), 2);
    }

    #[test]
    fn test_shrink_is_lifo() {
        let mut balloon = Balloon::default();
        balloon.resize_to(3 * BLOCK_SIZE);
        balloon.blocks[0][0] = 0xAA;
        balloon.blocks[2][0] = 0xCC;

        balloon.resize_to(2 * BLOCK_SIZE);

        assert_eq!(balloon.blocks.len(), 2);
        assert_eq!(balloon.blocks[0][0], 0xAA);
        assert_eq!(balloon.blocks[1][0], 0);
    }

    #[test]
    fn test_size_is_block_multiple_and_bounded_by_requests() {
        let engine = MemoryLoadEngine::with_total_memory(3 * GIB + 12_345);
        let step = engine.step_bytes();
        let mut requested = 0u64;

        let pattern = [true, true, false, true, false, false, false, true, true];
        for &increase in &pattern {
            if increase {
                requested += step;
            }
            let bytes = engine.adjust_step(increase).current_bytes;
            assert_eq!(bytes % BLOCK_SIZE, 0);
            assert!(bytes <= requested);
        }
    }

    #[test]
    fn test_compact_releases_spare_capacity() {
        let engine = MemoryLoadEngine::with_total_memory(10 * GIB);
        engine.adjust_step(true);
        engine.adjust_step(true);
        engine.adjust_step(false);
        engine.adjust_step(false);

        engine.compact();
        assert_eq!(engine.read().blocks.capacity(), 0);
        assert_eq!(engine.compact(), 0);
    }
}
