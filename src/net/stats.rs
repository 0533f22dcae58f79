//! Controller statistics readable from other threads.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters written by the controller thread and read anywhere.
#[derive(Debug, Default)]
pub struct ControllerStats {
    active: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    deferred: AtomicU64,
    accept_errors: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub accept_errors: u64,
    pub closed: u64,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self, active: usize) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self, active: usize) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.active.store(active, Ordering::Release);
    }

    /// Currently open connections.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active(),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}
