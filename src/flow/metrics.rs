//! Flow table counters.
//!
//! Relaxed atomic counters updated from the data path; read through
//! [`FlowTableMetrics::snapshot`] for administrative read-outs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Flow table metrics collector.
#[derive(Default)]
pub struct FlowTableMetrics {
    /// Packets handed downstream
    packets_dispatched: AtomicU64,
    /// Sub-batches handed downstream
    sub_batches: AtomicU64,
    /// Flows created
    flows_created: AtomicU64,
    /// Flows evicted by the reaper
    flows_evicted: AtomicU64,
    /// Flows removed explicitly
    flows_removed: AtomicU64,
    /// Packets dropped because the table was full
    dropped_full: AtomicU64,
    /// Packets returned to the caller because the table was full
    punted_full: AtomicU64,
    /// Packets without a flow key
    unclassified: AtomicU64,
    /// Flows evicted between classification and dispatch
    stale_reclassified: AtomicU64,
}

impl FlowTableMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_dispatched(&self, packets: usize) {
        self.packets_dispatched.fetch_add(packets as u64, Ordering::Relaxed);
        self.sub_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_evicted(&self, flows: usize) {
        self.flows_evicted.fetch_add(flows as u64, Ordering::Relaxed);
    }

    pub(crate) fn increment_removed(&self) {
        self.flows_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped_full(&self, packets: usize) {
        self.dropped_full.fetch_add(packets as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_punted_full(&self, packets: usize) {
        self.punted_full.fetch_add(packets as u64, Ordering::Relaxed);
    }

    pub(crate) fn increment_unclassified(&self) {
        self.unclassified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_stale(&self) {
        self.stale_reclassified.fetch_add(1, Ordering::Relaxed);
    }

    /// Get flows evicted by the reaper.
    pub fn flows_evicted(&self) -> u64 {
        self.flows_evicted.load(Ordering::Relaxed)
    }

    /// Get packets dropped or punted because the table was full.
    pub fn refused_packets(&self) -> u64 {
        self.dropped_full.load(Ordering::Relaxed) + self.punted_full.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            sub_batches: self.sub_batches.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_evicted: self.flows_evicted.load(Ordering::Relaxed),
            flows_removed: self.flows_removed.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            punted_full: self.punted_full.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            stale_reclassified: self.stale_reclassified.load(Ordering::Relaxed),
        }
    }

    /// Format metrics as a simple text report.
    pub fn format_report(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"Flow Table Metrics
==================
Flows:
  Created:  {}
  Evicted:  {}
  Removed:  {}

Packets:
  Dispatched:   {} ({} sub-batches, {:.2} per sub-batch)
  Dropped Full: {}
  Punted Full:  {}
  Unclassified: {}
  Reclassified: {}
"#,
            snapshot.flows_created,
            snapshot.flows_evicted,
            snapshot.flows_removed,
            snapshot.packets_dispatched,
            snapshot.sub_batches,
            snapshot.packets_per_sub_batch(),
            snapshot.dropped_full,
            snapshot.punted_full,
            snapshot.unclassified,
            snapshot.stale_reclassified,
        )
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Packets handed downstream
    pub packets_dispatched: u64,
    /// Sub-batches handed downstream
    pub sub_batches: u64,
    /// Flows created
    pub flows_created: u64,
    /// Flows evicted by the reaper
    pub flows_evicted: u64,
    /// Flows removed explicitly
    pub flows_removed: u64,
    /// Packets dropped because the table was full
    pub dropped_full: u64,
    /// Packets punted because the table was full
    pub punted_full: u64,
    /// Packets without a flow key
    pub unclassified: u64,
    /// Flows evicted between classification and dispatch
    pub stale_reclassified: u64,
}

impl MetricsSnapshot {
    /// Average number of packets coalesced per sub-batch.
    pub fn packets_per_sub_batch(&self) -> f64 {
        if self.sub_batches == 0 {
            0.0
        } else {
            self.packets_dispatched as f64 / self.sub_batches as f64
        }
    }

    /// Flows currently accounted as live.
    pub fn live_flows(&self) -> u64 {
        self.flows_created
            .saturating_sub(self.flows_evicted + self.flows_removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = FlowTableMetrics::new();
        assert_eq!(metrics.flows_evicted(), 0);
        assert_eq!(metrics.refused_packets(), 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = FlowTableMetrics::new();

        metrics.increment_created();
        metrics.increment_created();
        metrics.add_evicted(1);
        metrics.add_dispatched(6);
        metrics.add_dispatched(2);
        metrics.add_dropped_full(3);
        metrics.add_punted_full(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flows_created, 2);
        assert_eq!(snapshot.live_flows(), 1);
        assert_eq!(snapshot.sub_batches, 2);
        assert!((snapshot.packets_per_sub_batch() - 4.0).abs() < 0.01);
        assert_eq!(metrics.refused_packets(), 4);
    }

    #[test]
    fn test_format_report() {
        let metrics = FlowTableMetrics::new();
        metrics.increment_created();

        let report = metrics.format_report();
        assert!(report.contains("Flow Table Metrics"));
        assert!(report.contains("Created:  1"));
    }
}
