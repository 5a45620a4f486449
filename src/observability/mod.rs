//! Observability for dispatch operations.
//!
//! Counters are plain atomics; the in-flight gauge keeps a high-water mark
//! so the admission ceiling is observable after the fact.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collected across batch dispatches.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Messages delivered successfully.
    pub delivered: AtomicU64,
    /// Messages that exhausted all retries.
    pub failed: AtomicU64,
    /// Session connect attempts.
    pub connects: AtomicU64,
    /// Mid-batch reconnects after session loss.
    pub reconnects: AtomicU64,
    /// Reconciliation redelivery attempts.
    pub reconcile_attempts: AtomicU64,
    /// Units of work currently holding an admission slot.
    in_flight: AtomicU64,
    /// Highest number of slots ever held simultaneously.
    in_flight_high_water: AtomicU64,
}

impl DispatchMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivered message.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message that exhausted retries.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connect attempt.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a mid-batch reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one reconciliation redelivery attempt.
    pub fn record_reconcile_attempt(&self) {
        self.reconcile_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a unit of work entering its admission slot.
    pub fn slot_acquired(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight_high_water.fetch_max(now, Ordering::SeqCst);
    }

    /// Marks a unit of work releasing its admission slot.
    pub fn slot_released(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Units of work currently admitted.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest simultaneous admission count observed.
    pub fn in_flight_high_water(&self) -> u64 {
        self.in_flight_high_water.load(Ordering::SeqCst)
    }
}
