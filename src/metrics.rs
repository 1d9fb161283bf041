//! Ingestion counters
//!
//! Written only by the ingestion task, read by anyone. Relaxed ordering is
//! enough: counters are monotonic and never used for synchronization.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ReplicaMetrics {
    pub deltas_applied: AtomicU64,
    pub stale_dropped: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resyncs: AtomicU64,
    pub snapshots_applied: AtomicU64,
    /// match/done/change against an order or level that is not in the book
    pub missing_orders: AtomicU64,
    /// match results that left a maker with negative remaining size
    pub size_underflows: AtomicU64,
    pub control_frames: AtomicU64,
    /// applied deltas published while no event subscriber was attached
    pub events_unobserved: AtomicU64,
}

impl ReplicaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> ReplicaMetricsSummary {
        ReplicaMetricsSummary {
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            missing_orders: self.missing_orders.load(Ordering::Relaxed),
            size_underflows: self.size_underflows.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            events_unobserved: self.events_unobserved.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaMetricsSummary {
    pub deltas_applied: u64,
    pub stale_dropped: u64,
    pub gaps_detected: u64,
    pub resyncs: u64,
    pub snapshots_applied: u64,
    pub missing_orders: u64,
    pub size_underflows: u64,
    pub control_frames: u64,
    pub events_unobserved: u64,
}

impl std::fmt::Display for ReplicaMetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "applied={} stale={} gaps={} resyncs={} snapshots={} missing={} underflows={}",
            self.deltas_applied,
            self.stale_dropped,
            self.gaps_detected,
            self.resyncs,
            self.snapshots_applied,
            self.missing_orders,
            self.size_underflows,
        )
    }
}
