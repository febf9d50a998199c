//! Lightweight counters for one phase of the store.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct StoreMetrics {
    pub updates_applied: AtomicU64,
    pub updates_dropped: AtomicU64,
    pub notifications_delivered: AtomicU64,
    pub notifications_suppressed: AtomicU64,
    pub finals: AtomicU64,
    pub fallbacks_installed: AtomicU64,
    pub cycles_resolved: AtomicU64,
    pub fast_tracks_used: AtomicU64,
}

impl StoreMetrics {
    pub fn reset(&self) {
        self.updates_applied.store(0, Ordering::Relaxed);
        self.updates_dropped.store(0, Ordering::Relaxed);
        self.notifications_delivered.store(0, Ordering::Relaxed);
        self.notifications_suppressed.store(0, Ordering::Relaxed);
        self.finals.store(0, Ordering::Relaxed);
        self.fallbacks_installed.store(0, Ordering::Relaxed);
        self.cycles_resolved.store(0, Ordering::Relaxed);
        self.fast_tracks_used.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tasks_executed: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_suppressed: self.notifications_suppressed.load(Ordering::Relaxed),
            finals: self.finals.load(Ordering::Relaxed),
            fallbacks_installed: self.fallbacks_installed.load(Ordering::Relaxed),
            cycles_resolved: self.cycles_resolved.load(Ordering::Relaxed),
            fast_tracks_used: self.fast_tracks_used.load(Ordering::Relaxed),
            tasks_executed,
        }
    }
}

/// Counters collected while a phase ran, surfaced via the phase report.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub updates_applied: u64,
    pub updates_dropped: u64,
    pub notifications_delivered: u64,
    pub notifications_suppressed: u64,
    pub finals: u64,
    pub fallbacks_installed: u64,
    pub cycles_resolved: u64,
    pub fast_tracks_used: u64,
    pub tasks_executed: u64,
}
