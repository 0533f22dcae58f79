//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the connector.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sentinel for "no limit" in the signed limit fields.
pub const UNLIMITED: i64 = -1;

/// Root configuration for the connector.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Listening socket configuration.
    pub listener: ListenerConfig,

    /// Admission limits, reloadable at runtime.
    pub limits: LimitsConfig,

    /// Event loop timing.
    pub controller: ControllerConfig,

    /// Connection pooling and buffer sizes.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8182").
    pub bind_address: String,

    /// Expected accept backlog. Logged only; the OS default backlog is used.
    pub backlog_hint: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8182".to_string(),
            backlog_hint: 1024,
        }
    }
}

/// Admission limits. `-1` disables a limit.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrently open connections.
    pub max_total_connections: i64,

    /// Maximum concurrently open connections from a single peer IP.
    pub max_connections_per_host: i64,

    /// Pending request count at which the server reports overload and
    /// defers accepts. Compared with `>=` like the connection ceilings, so
    /// `0` defers everything.
    pub max_pending_requests: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_total_connections: UNLIMITED,
            max_connections_per_host: UNLIMITED,
            max_pending_requests: UNLIMITED,
        }
    }
}

/// Event loop timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Upper bound on a single poll wait in milliseconds.
    pub select_timeout_ms: u64,

    /// How long `await_startup` waits for the listener registration.
    pub startup_timeout_ms: u64,

    /// Connections idle for longer than this are closed. 0 disables reaping.
    pub idle_timeout_ms: u64,

    /// How long a shutdown keeps serving already open connections.
    pub drain_timeout_ms: u64,

    /// Readiness events fetched per poll.
    pub events_capacity: usize,
}

impl ControllerConfig {
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            select_timeout_ms: 100,
            startup_timeout_ms: 60_000,
            idle_timeout_ms: 0,
            drain_timeout_ms: 5_000,
            events_capacity: 1024,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Recycle buffers of closed connections for new ones.
    pub pooled_connections: bool,

    /// Maximum number of recycled buffer pairs kept around.
    pub max_idle_buffers: usize,

    /// Size of a single socket read in bytes.
    pub inbound_buffer_size: usize,

    /// Most bytes read from one connection per readiness step; the rest is
    /// read on a later loop iteration so other connections get a turn.
    pub read_budget: usize,

    /// Initial capacity of the outbound buffer in bytes.
    pub outbound_buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pooled_connections: true,
            max_idle_buffers: 256,
            inbound_buffer_size: 8 * 1024,
            read_budget: 64 * 1024,
            outbound_buffer_size: 8 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
