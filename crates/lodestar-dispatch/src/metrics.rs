//! Dispatch metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::endpoint::ServiceEndpoint;
use crate::error::ListenerError;
use crate::lifecycle::{CompletionRecord, CompletionStatus, LifecycleListener};
use crate::resolver::RequestContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Snapshot of dispatch metrics at a point in time.
pub struct MetricsSnapshot {
    /// Logical calls started.
    pub calls_started: u64,
    /// Load-balanced transport attempts started, including retries.
    ///
    /// Counted from `on_start_request`, so it excludes the unresolved send a
    /// DISCARDED call makes under `ResolutionMissPolicy::ExecuteOriginal`.
    /// Those sends equal `completed_discarded` when that policy is active.
    pub attempts_started: u64,
    /// Attempts beyond the first of each completed call.
    pub retries_total: u64,
    /// Calls completed with a response.
    pub completed_success: u64,
    /// Calls completed with an error.
    pub completed_failed: u64,
    /// Calls that resolved no endpoint on their first resolution.
    pub completed_discarded: u64,
    /// Sum of elapsed time over completed calls, in milliseconds.
    pub elapsed_ms_total: u64,
}

impl MetricsSnapshot {
    /// Calls that have started but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.calls_started.saturating_sub(
            self.completed_success + self.completed_failed + self.completed_discarded,
        )
    }
}

/// Thread-safe dispatch metrics collector.
///
/// Register it as a [`LifecycleListener`] to count every call it observes.
pub struct DispatchMetrics {
    calls_started: AtomicU64,
    attempts_started: AtomicU64,
    retries_total: AtomicU64,
    completed_success: AtomicU64,
    completed_failed: AtomicU64,
    completed_discarded: AtomicU64,
    elapsed_ms_total: AtomicU64,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl DispatchMetrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls_started: AtomicU64::new(0),
            attempts_started: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            completed_success: AtomicU64::new(0),
            completed_failed: AtomicU64::new(0),
            completed_discarded: AtomicU64::new(0),
            elapsed_ms_total: AtomicU64::new(0),
        }
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_started: self.calls_started.load(Ordering::Relaxed),
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            completed_success: self.completed_success.load(Ordering::Relaxed),
            completed_failed: self.completed_failed.load(Ordering::Relaxed),
            completed_discarded: self.completed_discarded.load(Ordering::Relaxed),
            elapsed_ms_total: self.elapsed_ms_total.load(Ordering::Relaxed),
        }
    }
}

impl LifecycleListener for DispatchMetrics {
    fn on_start(&self, _context: &RequestContext) -> Result<(), ListenerError> {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_start_request(
        &self,
        _context: &RequestContext,
        _selected: Option<&ServiceEndpoint>,
    ) -> Result<(), ListenerError> {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_complete(&self, record: &CompletionRecord) -> Result<(), ListenerError> {
        let counter = match record.status() {
            CompletionStatus::Success => &self.completed_success,
            CompletionStatus::Failed => &self.completed_failed,
            CompletionStatus::Discarded => &self.completed_discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.retries_total
            .fetch_add(u64::from(record.attempts().saturating_sub(1)), Ordering::Relaxed);
        self.elapsed_ms_total
            .fetch_add(record.elapsed().as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }
}
