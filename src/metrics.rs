// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Every button press, counted
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for the controller and the refetch loop. Relaxed ordering
// throughout: these are tallies, nothing synchronizes on them. The daemon
// logs a JSON snapshot on shutdown.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Instant;

use crate::error::ControllerError;

/// Point-in-time copy of every counter.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transitions_attempted: u64,
    pub transitions_committed: u64,
    pub transitions_rejected: u64,
    pub network_failures: u64,
    pub rollbacks: u64,
    pub validation_failures: u64,
    pub in_flight_conflicts: u64,
    pub ratings_submitted: u64,
    pub refetches: u64,
    pub refetch_failures: u64,
    pub stale_notices: u64,
    pub circuit_breaker_trips: u64,
    pub uptime_seconds: u64,
}

pub struct MetricsCollector {
    transitions_attempted: AtomicU64,
    transitions_committed: AtomicU64,
    transitions_rejected: AtomicU64,
    network_failures: AtomicU64,
    rollbacks: AtomicU64,
    validation_failures: AtomicU64,
    in_flight_conflicts: AtomicU64,
    ratings_submitted: AtomicU64,
    refetches: AtomicU64,
    refetch_failures: AtomicU64,
    stale_notices: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            transitions_attempted: AtomicU64::new(0),
            transitions_committed: AtomicU64::new(0),
            transitions_rejected: AtomicU64::new(0),
            network_failures: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            in_flight_conflicts: AtomicU64::new(0),
            ratings_submitted: AtomicU64::new(0),
            refetches: AtomicU64::new(0),
            refetch_failures: AtomicU64::new(0),
            stale_notices: AtomicU64::new(0),
            circuit_breaker_trips: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_attempted(&self) {
        self.transitions_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_committed(&self) {
        self.transitions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ratings(&self) {
        self.ratings_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refetches(&self) {
        self.refetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refetch_failures(&self) {
        self.refetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_notices(&self) {
        self.stale_notices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_circuit_breaker_trips(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the counter matching a controller failure.
    pub fn record_error(&self, err: &ControllerError) {
        let counter = match err {
            ControllerError::Validation { .. } => &self.validation_failures,
            ControllerError::ActionInFlight { .. } => &self.in_flight_conflicts,
            ControllerError::TransitionRejected { .. } => &self.transitions_rejected,
            ControllerError::Network { .. } => &self.network_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transitions_attempted: self.transitions_attempted.load(Ordering::Relaxed),
            transitions_committed: self.transitions_committed.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            in_flight_conflicts: self.in_flight_conflicts.load(Ordering::Relaxed),
            ratings_submitted: self.ratings_submitted.load(Ordering::Relaxed),
            refetches: self.refetches.load(Ordering::Relaxed),
            refetch_failures: self.refetch_failures.load(Ordering::Relaxed),
            stale_notices: self.stale_notices.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
