//! Memory accounting and streaming counters
//!
//! Counters are plain atomics written by whichever channel finishes a
//! request. They are exact once no requests are pending.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of streaming statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Bytes held by resources that are buffering or loaded
    pub memory_in_use: usize,
    /// Memory budget in bytes
    pub max_memory: usize,
    /// Highest `memory_in_use` observed
    pub peak_memory: usize,
    /// Loads that reached `Loaded`
    pub loads_completed: u64,
    /// Loads that ended back in `Unloaded`
    pub loads_failed: u64,
    /// Unloads whose handler call succeeded
    pub unloads_completed: u64,
    /// Unloads whose handler call failed
    pub unloads_failed: u64,
    /// Queued requests removed before they started
    pub requests_cancelled: u64,
}

impl StreamingStats {
    /// Whether usage exceeds the budget
    pub fn over_budget(&self) -> bool {
        self.memory_in_use > self.max_memory
    }
}

/// Shared atomic counters behind [`StreamingStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    memory_in_use: AtomicUsize,
    max_memory: AtomicUsize,
    peak_memory: AtomicUsize,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    unloads_completed: AtomicU64,
    unloads_failed: AtomicU64,
    requests_cancelled: AtomicU64,
}

impl StatsCounters {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory: AtomicUsize::new(max_memory),
            ..Self::default()
        }
    }

    /// Account `bytes` as resident, saturating at `usize::MAX`
    pub fn add_memory(&self, bytes: usize) {
        let previous = self
            .memory_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_add(bytes))
            })
            .unwrap_or_default();
        let current = previous.saturating_add(bytes);
        self.peak_memory.fetch_max(current, Ordering::AcqRel);

        let budget = self.max_memory.load(Ordering::Relaxed);
        if previous <= budget && current > budget {
            log::warn!(
                "Streaming memory over budget: {} bytes in use, budget {} bytes",
                current,
                budget
            );
        }
    }

    /// Release `bytes`, saturating at zero
    pub fn sub_memory(&self, bytes: usize) {
        let _ = self
            .memory_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Replace an accounted `old` size with `new`
    pub fn resize_memory(&self, old: usize, new: usize) {
        if new > old {
            self.add_memory(new - old);
        } else {
            self.sub_memory(old - new);
        }
    }

    pub fn memory_in_use(&self) -> usize {
        self.memory_in_use.load(Ordering::Acquire)
    }

    pub fn set_max_memory(&self, bytes: usize) {
        self.max_memory.store(bytes, Ordering::Relaxed);
    }

    pub fn load_completed(&self) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unload_completed(&self) {
        self.unloads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unload_failed(&self) {
        self.unloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamingStats {
        StreamingStats {
            memory_in_use: self.memory_in_use(),
            max_memory: self.max_memory.load(Ordering::Relaxed),
            peak_memory: self.peak_memory.load(Ordering::Acquire),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            unloads_completed: self.unloads_completed.load(Ordering::Relaxed),
            unloads_failed: self.unloads_failed.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
        }
    }
}
