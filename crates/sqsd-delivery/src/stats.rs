//! Delivery counters shared by the receiver and workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free delivery counters.
///
/// Updated from the receiver and every worker without coordination; read as
/// a point-in-time [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct DeliveryStats {
    received: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    acknowledged: AtomicU64,
    ack_failures: AtomicU64,
    relinquished: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages returned by receive calls.
    pub received: u64,
    /// Deliveries answered with a 2xx.
    pub delivered: u64,
    /// Deliveries that failed for any reason.
    pub failed: u64,
    /// Successful deletes.
    pub acknowledged: u64,
    /// Deletes that returned an error.
    pub ack_failures: u64,
    /// Messages received but never handed to a worker.
    pub relinquished: u64,
    /// Deliveries currently in progress.
    pub in_flight: u64,
    /// Highest concurrent delivery count observed.
    pub peak_in_flight: u64,
}

impl DeliveryStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self, count: usize) {
        self.received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_relinquished(&self, count: usize) {
        self.relinquished.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Marks a delivery as started, returning a guard that ends it on drop.
    pub(crate) fn begin_delivery(&self) -> InFlightGuard<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::AcqRel);
        InFlightGuard { stats: self }
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of deliveries currently in progress.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns a copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            relinquished: self.relinquished.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
        }
    }
}

/// Decrements the in-flight counter when the delivery ends.
#[derive(Debug)]
pub(crate) struct InFlightGuard<'a> {
    stats: &'a DeliveryStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
