//! Observability and Metrics
//!
//! This module provides metrics collection and observability features
//! for monitoring control-channel traffic and rejections.
//!
//! Uses atomic counters for thread-safe metrics collection. The classifier
//! never records anything itself; callers feed its verdicts in through
//! [`Metrics::record_verdict`].

use crate::protocol::pre_decrypt::Verdict;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for control-channel operations
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams run through the classifier
    pub packets_inspected: AtomicU64,
    /// Classified as new session requests
    pub verdict_reset: AtomicU64,
    /// Classified as control packets of a session
    pub verdict_control: AtomicU64,
    /// Dropped by the classifier
    pub verdict_invalid: AtomicU64,
    /// Control records wrapped for sending
    pub records_written: AtomicU64,
    /// Control records that verified on a session
    pub records_read: AtomicU64,
    /// Records failing tag verification on a session
    pub auth_failures: AtomicU64,
    /// Records rejected by a replay window
    pub replays_rejected: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            packets_inspected: AtomicU64::new(0),
            verdict_reset: AtomicU64::new(0),
            verdict_control: AtomicU64::new(0),
            verdict_invalid: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            records_read: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            replays_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a classifier verdict
    pub fn record_verdict(&self, verdict: Verdict) {
        self.packets_inspected.fetch_add(1, Ordering::Relaxed);
        let counter = match verdict {
            Verdict::ValidReset => &self.verdict_reset,
            Verdict::ValidControlV1 => &self.verdict_control,
            Verdict::Invalid => &self.verdict_invalid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rejected(&self) {
        self.replays_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_inspected: self.packets_inspected.load(Ordering::Relaxed),
            verdict_reset: self.verdict_reset.load(Ordering::Relaxed),
            verdict_control: self.verdict_control.load(Ordering::Relaxed),
            verdict_invalid: self.verdict_invalid.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            replays_rejected: self.replays_rejected.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_inspected = snapshot.packets_inspected,
            verdict_reset = snapshot.verdict_reset,
            verdict_control = snapshot.verdict_control,
            verdict_invalid = snapshot.verdict_invalid,
            records_written = snapshot.records_written,
            records_read = snapshot.records_read,
            auth_failures = snapshot.auth_failures,
            replays_rejected = snapshot.replays_rejected,
            uptime_seconds = snapshot.uptime_seconds,
            "Control channel metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub packets_inspected: u64,
    pub verdict_reset: u64,
    pub verdict_control: u64,
    pub verdict_invalid: u64,
    pub records_written: u64,
    pub records_read: u64,
    pub auth_failures: u64,
    pub replays_rejected: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_counters() {
        let metrics = Metrics::new();
        metrics.record_verdict(Verdict::ValidReset);
        metrics.record_verdict(Verdict::Invalid);
        metrics.record_verdict(Verdict::Invalid);
        metrics.replay_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_inspected, 3);
        assert_eq!(snapshot.verdict_reset, 1);
        assert_eq!(snapshot.verdict_control, 0);
        assert_eq!(snapshot.verdict_invalid, 2);
        assert_eq!(snapshot.replays_rejected, 1);
    }
}
