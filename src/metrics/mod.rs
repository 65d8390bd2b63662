//! Lock and codec metrics
//!
//! Every [`ConcurrentMap`](crate::ConcurrentMap) carries a set of relaxed atomic
//! counters describing how its lock is used and how much data passes through the
//! codec. Counting is a handful of relaxed increments per acquisition and can be
//! switched off at runtime through [`MetricsCollector::set_metrics_enabled`].

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Snapshot of a map's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapMetrics {
    /// Shared acquisitions, including upgradable reads
    pub shared_acquisitions: u64,
    /// Exclusive acquisitions, including upgrades
    pub exclusive_acquisitions: u64,
    /// Acquisitions that could not take the lock immediately and had to block
    pub contended_acquisitions: u64,
    /// Successful encodes
    pub encodes: u64,
    /// Failed encodes
    pub encode_failures: u64,
    /// Successful decodes
    pub decodes: u64,
    /// Failed decodes
    pub decode_failures: u64,
    /// Total bytes produced by successful encodes
    pub bytes_encoded: u64,
    /// Total bytes consumed by successful decodes
    pub bytes_decoded: u64,
}

impl MapMetrics {
    /// Total number of lock acquisitions of either kind
    pub fn total_acquisitions(&self) -> u64 {
        self.shared_acquisitions + self.exclusive_acquisitions
    }

    /// Percentage of acquisitions that had to block
    pub fn contention_rate(&self) -> f64 {
        let total = self.total_acquisitions();
        if total == 0 {
            0.0
        } else {
            (self.contended_acquisitions as f64 / total as f64) * 100.0
        }
    }

    /// Percentage of decode attempts that failed
    pub fn decode_failure_rate(&self) -> f64 {
        let total = self.decodes + self.decode_failures;
        if total == 0 {
            0.0
        } else {
            (self.decode_failures as f64 / total as f64) * 100.0
        }
    }
}

/// Internal atomic counters backing [`MapMetrics`]
#[derive(Debug)]
pub(crate) struct AtomicMetrics {
    enabled: AtomicBool,
    shared_acquisitions: AtomicU64,
    exclusive_acquisitions: AtomicU64,
    contended_acquisitions: AtomicU64,
    encodes: AtomicU64,
    encode_failures: AtomicU64,
    decodes: AtomicU64,
    decode_failures: AtomicU64,
    bytes_encoded: AtomicU64,
    bytes_decoded: AtomicU64,
}

impl Default for AtomicMetrics {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            shared_acquisitions: AtomicU64::new(0),
            exclusive_acquisitions: AtomicU64::new(0),
            contended_acquisitions: AtomicU64::new(0),
            encodes: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            decodes: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            bytes_encoded: AtomicU64::new(0),
            bytes_decoded: AtomicU64::new(0),
        }
    }
}

impl AtomicMetrics {
    #[inline]
    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.enabled.load(Ordering::Relaxed) {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    /// Record a shared acquisition
    #[inline]
    pub(crate) fn record_shared(&self, contended: bool) {
        self.bump(&self.shared_acquisitions, 1);
        if contended {
            self.bump(&self.contended_acquisitions, 1);
        }
    }

    /// Record an exclusive acquisition
    #[inline]
    pub(crate) fn record_exclusive(&self, contended: bool) {
        self.bump(&self.exclusive_acquisitions, 1);
        if contended {
            self.bump(&self.contended_acquisitions, 1);
        }
    }

    #[cfg(feature = "serde")]
    pub(crate) fn record_encode(&self, bytes: usize) {
        self.bump(&self.encodes, 1);
        self.bump(&self.bytes_encoded, bytes as u64);
    }

    #[cfg(feature = "serde")]
    pub(crate) fn record_encode_failure(&self) {
        self.bump(&self.encode_failures, 1);
    }

    #[cfg(feature = "serde")]
    pub(crate) fn record_decode(&self, bytes: usize) {
        self.bump(&self.decodes, 1);
        self.bump(&self.bytes_decoded, bytes as u64);
    }

    #[cfg(feature = "serde")]
    pub(crate) fn record_decode_failure(&self) {
        self.bump(&self.decode_failures, 1);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub(crate) fn snapshot(&self) -> MapMetrics {
        MapMetrics {
            shared_acquisitions: self.shared_acquisitions.load(Ordering::Relaxed),
            exclusive_acquisitions: self.exclusive_acquisitions.load(Ordering::Relaxed),
            contended_acquisitions: self.contended_acquisitions.load(Ordering::Relaxed),
            encodes: self.encodes.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            bytes_encoded: self.bytes_encoded.load(Ordering::Relaxed),
            bytes_decoded: self.bytes_decoded.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters, leaving the enabled flag as is
    pub(crate) fn reset(&self) {
        for counter in [
            &self.shared_acquisitions,
            &self.exclusive_acquisitions,
            &self.contended_acquisitions,
            &self.encodes,
            &self.encode_failures,
            &self.decodes,
            &self.decode_failures,
            &self.bytes_encoded,
            &self.bytes_decoded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Trait for data structures that expose metrics
pub trait MetricsCollector {
    /// Get current metrics
    fn metrics(&self) -> MapMetrics;

    /// Reset all metrics
    fn reset_metrics(&self);

    /// Enable or disable metrics collection
    fn set_metrics_enabled(&self, enabled: bool);

    /// Check if metrics collection is enabled
    fn is_metrics_enabled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_on_empty_metrics() {
        let metrics = MapMetrics::default();
        assert_eq!(metrics.total_acquisitions(), 0);
        assert_eq!(metrics.contention_rate(), 0.0);
        assert_eq!(metrics.decode_failure_rate(), 0.0);
    }

    #[test]
    fn test_record_and_snapshot() {
        let metrics = AtomicMetrics::default();
        metrics.record_shared(false);
        metrics.record_shared(true);
        metrics.record_exclusive(false);
        metrics.record_exclusive(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.shared_acquisitions, 2);
        assert_eq!(snapshot.exclusive_acquisitions, 2);
        assert_eq!(snapshot.contended_acquisitions, 2);
        assert_eq!(snapshot.contention_rate(), 50.0);
    }

    #[test]
    fn test_disabled_metrics_do_not_count() {
        let metrics = AtomicMetrics::default();
        metrics.set_enabled(false);
        assert!(!metrics.is_enabled());
        metrics.record_shared(true);
        metrics.record_exclusive(false);
        assert_eq!(metrics.snapshot(), MapMetrics::default());

        metrics.set_enabled(true);
        metrics.record_exclusive(false);
        assert_eq!(metrics.snapshot().exclusive_acquisitions, 1);
    }

    #[test]
    fn test_reset_keeps_enabled_flag() {
        let metrics = AtomicMetrics::default();
        metrics.record_shared(false);
        metrics.set_enabled(false);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MapMetrics::default());
        assert!(!metrics.is_enabled());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_codec_counters() {
        let metrics = AtomicMetrics::default();
        metrics.record_encode(40);
        metrics.record_encode_failure();
        metrics.record_decode(40);
        metrics.record_decode_failure();
        metrics.record_decode_failure();
        metrics.record_decode_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.encodes, 1);
        assert_eq!(snapshot.encode_failures, 1);
        assert_eq!(snapshot.bytes_encoded, 40);
        assert_eq!(snapshot.bytes_decoded, 40);
        assert_eq!(snapshot.decode_failure_rate(), 75.0);
    }
}
