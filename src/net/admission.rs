//! Admission control.
//!
//! # Responsibilities
//! - Decide whether the server should accept anything at all right now (overload)
//! - Decide whether one accepted socket may stay open (connection ceilings)
//!
//! # Design Decisions
//! - Overload is an injected policy; the acceptor never hardcodes its inputs
//! - Limits are read through an `ArcSwap` so a config reload applies on the next accept
//! - Both checks run fresh on every accept, nothing is cached

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::LimitsConfig;

/// Live, swappable admission limits.
pub type SharedLimits = Arc<ArcSwap<LimitsConfig>>;

pub fn shared_limits(limits: LimitsConfig) -> SharedLimits {
    Arc::new(ArcSwap::from_pointee(limits))
}

/// Whether the owning server is too busy to take new connections.
pub trait OverloadPolicy: Send + Sync {
    fn is_overloaded(&self) -> bool;
}

impl<F> OverloadPolicy for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_overloaded(&self) -> bool {
        self()
    }
}

/// Policy for servers without an overload signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverloaded;

impl OverloadPolicy for NeverOverloaded {
    fn is_overloaded(&self) -> bool {
        false
    }
}

/// Counter of in-flight work, shared between protocols and the overload policy.
#[derive(Debug, Clone, Default)]
pub struct LoadGauge {
    pending: Arc<AtomicUsize>,
}

impl LoadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one unit of work until the returned guard is dropped.
    pub fn enter(&self) -> LoadGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        LoadGuard {
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn current(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Guard that tracks one unit of in-flight work.
/// Decrements the gauge when dropped.
#[derive(Debug)]
pub struct LoadGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Overloaded once the gauge reaches `limits.max_pending_requests`, the same
/// boundary [`admit`] applies to connection ceilings.
#[derive(Debug, Clone)]
pub struct PendingRequestThreshold {
    gauge: LoadGauge,
    limits: SharedLimits,
}

impl PendingRequestThreshold {
    pub fn new(gauge: LoadGauge, limits: SharedLimits) -> Self {
        Self { gauge, limits }
    }
}

impl OverloadPolicy for PendingRequestThreshold {
    fn is_overloaded(&self) -> bool {
        match usize::try_from(self.limits.load().max_pending_requests) {
            Ok(max) => self.gauge.current() >= max,
            Err(_) => false,
        }
    }
}

/// Outcome of the ceiling checks for one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// The server already holds `max` connections.
    RejectTotal { active: usize, max: usize },
    /// The peer already holds `max` connections.
    RejectPerHost { host_active: usize, max: usize },
}

/// Check the ceilings for a new connection given the current counts.
///
/// A limit of `-1` is unlimited; any non-negative value is a hard ceiling,
/// including `0`.
pub fn admit(limits: &LimitsConfig, active: usize, host_active: usize) -> Admission {
    if let Ok(max) = usize::try_from(limits.max_total_connections) {
        if active >= max {
            return Admission::RejectTotal { active, max };
        }
    }

    if let Ok(max) = usize::try_from(limits.max_connections_per_host) {
        if host_active >= max {
            return Admission::RejectPerHost { host_active, max };
        }
    }

    Admission::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNLIMITED;
    use std::sync::atomic::AtomicBool;

    fn limits(total: i64, per_host: i64) -> LimitsConfig {
        LimitsConfig {
            max_total_connections: total,
            max_connections_per_host: per_host,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn unlimited_accepts_everything() {
        let limits = limits(UNLIMITED, UNLIMITED);
        assert_eq!(admit(&limits, 0, 0), Admission::Accept);
        assert_eq!(admit(&limits, 1_000_000, 1_000_000), Admission::Accept);
    }

    #[test]
    fn total_ceiling_rejects_at_max() {
        let limits = limits(2, UNLIMITED);
        assert_eq!(admit(&limits, 0, 0), Admission::Accept);
        assert_eq!(admit(&limits, 1, 1), Admission::Accept);
        assert_eq!(
            admit(&limits, 2, 0),
            Admission::RejectTotal { active: 2, max: 2 }
        );
    }

    #[test]
    fn zero_ceiling_rejects_all() {
        assert_eq!(
            admit(&limits(0, UNLIMITED), 0, 0),
            Admission::RejectTotal { active: 0, max: 0 }
        );
    }

    #[test]
    fn per_host_ceiling() {
        let limits = limits(UNLIMITED, 1);
        assert_eq!(admit(&limits, 5, 0), Admission::Accept);
        assert_eq!(
            admit(&limits, 5, 1),
            Admission::RejectPerHost { host_active: 1, max: 1 }
        );
    }

    #[test]
    fn gauge_guard_decrements_on_drop() {
        let gauge = LoadGauge::new();
        let g1 = gauge.enter();
        let g2 = gauge.enter();
        assert_eq!(gauge.current(), 2);
        drop(g1);
        assert_eq!(gauge.current(), 1);
        drop(g2);
        assert_eq!(gauge.current(), 0);
    }

    #[test]
    fn pending_threshold_follows_live_limits() {
        let gauge = LoadGauge::new();
        let shared = shared_limits(LimitsConfig::default());
        let policy = PendingRequestThreshold::new(gauge.clone(), shared.clone());

        let _g1 = gauge.enter();
        let _g2 = gauge.enter();
        assert!(!policy.is_overloaded(), "unlimited by default");

        shared.store(Arc::new(LimitsConfig {
            max_pending_requests: 1,
            ..LimitsConfig::default()
        }));
        assert!(policy.is_overloaded());

        shared.store(Arc::new(LimitsConfig {
            max_pending_requests: 3,
            ..LimitsConfig::default()
        }));
        assert!(!policy.is_overloaded());
    }

    #[test]
    fn pending_threshold_is_reached_at_max() {
        let gauge = LoadGauge::new();
        let shared = shared_limits(LimitsConfig {
            max_pending_requests: 1,
            ..LimitsConfig::default()
        });
        let policy = PendingRequestThreshold::new(gauge.clone(), shared.clone());
        assert!(!policy.is_overloaded());

        let guard = gauge.enter();
        assert!(policy.is_overloaded());
        drop(guard);
        assert!(!policy.is_overloaded());

        shared.store(Arc::new(LimitsConfig {
            max_pending_requests: 0,
            ..LimitsConfig::default()
        }));
        assert!(policy.is_overloaded(), "zero defers every accept");
    }

    #[test]
    fn closures_are_policies() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = flag.clone();
        let policy: Arc<dyn OverloadPolicy> =
            Arc::new(move || observed.load(Ordering::SeqCst));

        assert!(!policy.is_overloaded());
        flag.store(true, Ordering::SeqCst);
        assert!(policy.is_overloaded());
        assert!(!NeverOverloaded.is_overloaded());
    }
}
