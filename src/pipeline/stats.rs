//! Delivery counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Live counters of one sink lane.
#[derive(Debug, Default)]
pub struct SinkStats {
    pub(crate) enqueued: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) dropped_exhausted: AtomicU64,
    pub(crate) dropped_circuit_open: AtomicU64,
    pub(crate) dropped_shutdown: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) circuit_open: AtomicBool,
}

impl SinkStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, sink: &str, queue_depth: usize) -> SinkSnapshot {
        SinkSnapshot {
            sink: sink.to_string(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            dropped_circuit_open: self.dropped_circuit_open.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            queue_depth: queue_depth as u64,
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkSnapshot {
    pub sink: String,
    /// Tasks handed to this sink, including evicted and rejected ones.
    pub enqueued: u64,
    pub delivered: u64,
    pub dropped_exhausted: u64,
    pub dropped_circuit_open: u64,
    pub dropped_shutdown: u64,
    pub evictions: u64,
    pub queue_depth: u64,
    pub circuit_open: bool,
}

impl SinkSnapshot {
    /// Tasks dropped after being dequeued or at shutdown.
    pub fn drops(&self) -> u64 {
        self.dropped_exhausted + self.dropped_circuit_open + self.dropped_shutdown
    }

    /// Tasks that reached a terminal outcome or are still queued.
    ///
    /// Equals `enqueued` whenever no task is in flight.
    pub fn accounted(&self) -> u64 {
        self.delivered + self.drops() + self.evictions + self.queue_depth
    }
}

/// Counters of the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub sinks: Vec<SinkSnapshot>,
    pub collect_errors: u64,
}

impl PipelineSnapshot {
    pub fn sink(&self, name: &str) -> Option<&SinkSnapshot> {
        self.sinks.iter().find(|s| s.sink == name)
    }

    pub fn delivered(&self) -> u64 {
        self.sinks.iter().map(|s| s.delivered).sum()
    }

    pub fn drops(&self) -> u64 {
        self.sinks.iter().map(SinkSnapshot::drops).sum()
    }

    pub fn evictions(&self) -> u64 {
        self.sinks.iter().map(|s| s.evictions).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_accounting() {
        let stats = SinkStats::default();
        for _ in 0..6 {
            SinkStats::incr(&stats.enqueued);
        }
        SinkStats::incr(&stats.delivered);
        SinkStats::incr(&stats.dropped_exhausted);
        SinkStats::incr(&stats.dropped_circuit_open);
        SinkStats::incr(&stats.evictions);

        let snapshot = stats.snapshot("influx", 2);
        assert_eq!(snapshot.drops(), 2);
        assert_eq!(snapshot.accounted(), snapshot.enqueued);

        let pipeline = PipelineSnapshot {
            sinks: vec![snapshot],
            collect_errors: 3,
        };
        assert_eq!(pipeline.sink("influx").map(|s| s.evictions), Some(1));
        assert!(pipeline.sink("riemann").is_none());
    }
}
