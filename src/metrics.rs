//! Running aggregate statistics for the image store.
//!
//! `total_bytes` is only mutated from inside a store transaction, so a reader
//! holding the store's read lock always sees it agree with the table.
//! Latency samples have no cross-structure invariant and live behind their
//! own mutex; they accumulate for the life of the aggregator and survive
//! [`MetricsAggregator::reset_storage`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_bytes: AtomicU64,
    latency_samples: Mutex<Vec<f64>>,
}

/// Point-in-time view handed to presentation.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub record_count: usize,
    pub total_bytes: u64,
    pub uncompressed_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
    pub latency_samples: usize,
    pub compression_ratio_percent: f64,
    pub storage_warning: bool,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self, size_bytes: u64) {
        self.total_bytes.fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub fn record_retrieval_latency(&self, ms: f64) {
        // A poisoned sample log is still a valid list of numbers
        let mut samples = self.latency_samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push(ms);
    }

    pub fn reset_storage(&self) {
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Mean of every sample ever recorded; `None` before the first one.
    pub fn average_latency_ms(&self) -> Option<f64> {
        let samples = self.latency_samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    pub fn sample_count(&self) -> usize {
        self.latency_samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `uncompressed_bytes` is the live estimate computed by the caller from
    /// the current record set.
    pub fn snapshot(&self, record_count: usize, uncompressed_bytes: u64, warning_threshold: u64) -> MetricsSnapshot {
        let total_bytes = self.total_bytes();
        MetricsSnapshot {
            record_count,
            total_bytes,
            uncompressed_bytes,
            average_latency_ms: self.average_latency_ms(),
            latency_samples: self.sample_count(),
            compression_ratio_percent: compression_ratio_percent(total_bytes, uncompressed_bytes),
            storage_warning: total_bytes > warning_threshold,
        }
    }
}

/// `(1 - stored / uncompressed) * 100`, or 0 when there is nothing to compare against.
pub fn compression_ratio_percent(stored: u64, uncompressed: u64) -> f64 {
    if uncompressed == 0 {
        return 0.0;
    }
    (1.0 - stored as f64 / uncompressed as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate_and_reset() {
        let m = MetricsAggregator::new();
        m.record_insert(100);
        m.record_insert(250);
        assert_eq!(m.total_bytes(), 350);
        m.reset_storage();
        assert_eq!(m.total_bytes(), 0);
    }

    #[test]
    fn average_latency() {
        let m = MetricsAggregator::new();
        assert_eq!(m.average_latency_ms(), None);
        m.record_retrieval_latency(2.0);
        m.record_retrieval_latency(4.0);
        assert_eq!(m.average_latency_ms(), Some(3.0));
    }

    #[test]
    fn reset_keeps_latency_history() {
        let m = MetricsAggregator::new();
        m.record_insert(10);
        m.record_retrieval_latency(5.0);
        m.reset_storage();
        assert_eq!(m.average_latency_ms(), Some(5.0));
        assert_eq!(m.sample_count(), 1);
    }

    #[test]
    fn compression_ratio() {
        let ratio = compression_ratio_percent(500_000, 800 * 600 * 3);
        assert!((ratio - 65.277).abs() < 0.01, "ratio {ratio}");
        assert_eq!(compression_ratio_percent(123, 0), 0.0);
    }

    #[test]
    fn snapshot_flags_storage_warning() {
        let m = MetricsAggregator::new();
        m.record_insert(101);
        let snap = m.snapshot(1, 1_000, 100);
        assert!(snap.storage_warning);
        assert_eq!(snap.average_latency_ms, None);

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("average_latency_ms").is_none());
        assert_eq!(json["total_bytes"], 101);
    }
}
