//! Engine statistics: atomic counters, never module-scope globals.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by the engine.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub collisions: AtomicU64,
    pub decoy_cells: AtomicU64,
    pub scatter_ops: AtomicU64,
    pub gather_ops: AtomicU64,
    pub rescatter_count: AtomicU64,
    pub rescatter_failures: AtomicU64,
    pub integrity_failures: AtomicU64,
    pub saturation_errors: AtomicU64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            decoy_cells: self.decoy_cells.load(Ordering::Relaxed),
            scatter_ops: self.scatter_ops.load(Ordering::Relaxed),
            gather_ops: self.gather_ops.load(Ordering::Relaxed),
            rescatter_count: self.rescatter_count.load(Ordering::Relaxed),
            rescatter_failures: self.rescatter_failures.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            saturation_errors: self.saturation_errors.load(Ordering::Relaxed),
        }
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time view returned by `Engine::statistics`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub collisions: u64,
    pub decoy_cells: u64,
    pub scatter_ops: u64,
    pub gather_ops: u64,
    pub rescatter_count: u64,
    pub rescatter_failures: u64,
    pub integrity_failures: u64,
    pub saturation_errors: u64,
}
