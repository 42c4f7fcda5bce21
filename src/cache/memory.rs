use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::store::CacheUsage;

/// Source of the "used bytes" figure compared against the memory budget.
///
/// Recycling runs while `used_bytes > budget`. The figure does not have to be the cache's own
/// footprint: process-wide monitors let pressure from other subsystems trigger recycling too.
pub trait MemoryMonitor: Send + Sync {
    /// Bytes in use, given what the cache currently holds.
    fn used_bytes(&self, cache: &CacheUsage) -> u64;
}

/// Counts only what the cache itself holds. Deterministic; the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheMemory;

impl MemoryMonitor for CacheMemory {
    fn used_bytes(&self, cache: &CacheUsage) -> u64 {
        cache.resident_bytes
    }
}

/// Resident set size of the whole process.
///
/// Read from `/proc/self/statm`; where that is unavailable the cache's own bytes are used.
#[derive(Clone, Copy, Debug)]
pub struct ProcessMemory {
    page_size: u64,
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self { page_size: 4096 }
    }
}

impl ProcessMemory {
    /// Monitor for a system with `page_size`-byte pages.
    pub fn new(page_size: u64) -> Self {
        Self { page_size }
    }

    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages.saturating_mul(self.page_size))
    }
}

impl MemoryMonitor for ProcessMemory {
    fn used_bytes(&self, cache: &CacheUsage) -> u64 {
        self.resident_bytes().unwrap_or(cache.resident_bytes)
    }
}

/// Externally driven gauge, for simulating pressure from outside the cache.
///
/// Reports `max(gauge, cache bytes)` so recycling can still converge once the gauge is lowered.
#[derive(Clone, Debug, Default)]
pub struct SharedMemoryGauge {
    bytes: Arc<AtomicU64>,
}

impl SharedMemoryGauge {
    /// Gauge reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the external figure. Clones see it too.
    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
    }

    /// Current external figure.
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl MemoryMonitor for SharedMemoryGauge {
    fn used_bytes(&self, cache: &CacheUsage) -> u64 {
        self.get().max(cache.resident_bytes)
    }
}
