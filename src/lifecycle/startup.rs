//! Startup gate.
//!
//! # Responsibilities
//! - Signal, exactly once, that the listening socket is registered for accept events
//! - Let any number of threads wait for that signal with a bounded timeout
//!
//! # Design Decisions
//! - Latch state is a boolean behind a mutex with a condition variable
//! - A timed out wait is reported, not raised: callers treat it as "not ready yet"

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

/// One-shot, cross-thread readiness signal.
///
/// Clones share the same latch.
#[derive(Debug, Clone, Default)]
pub struct StartupGate {
    latch: Arc<Latch>,
}

impl StartupGate {
    /// Create a gate in the pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release the gate and wake every waiter.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn release(&self) -> bool {
        let mut released = self
            .latch
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *released {
            return false;
        }
        *released = true;
        self.latch.cond.notify_all();
        true
    }

    pub fn is_released(&self) -> bool {
        *self
            .latch
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the gate is released or `timeout` elapses.
    ///
    /// Returns whether the gate was released. A timeout is logged at warn level.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self
            .latch
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !*released {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "The calling thread timed out while waiting for the controller to be ready to accept connections"
                );
                return false;
            }
            released = self
                .latch
                .cond
                .wait_timeout(released, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }
}
