//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits >= -1, timeouts > 0, buffers > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ConnectorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ConnectorConfig, UNLIMITED};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: {value} is neither -1 (unlimited) nor a non-negative count")]
    InvalidLimit { field: &'static str, value: i64 },

    #[error("{field}: must be greater than zero")]
    Zero { field: &'static str },
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ConnectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let limits = &config.limits;
    check_limit(&mut errors, "limits.max_total_connections", limits.max_total_connections);
    check_limit(&mut errors, "limits.max_connections_per_host", limits.max_connections_per_host);
    check_limit(&mut errors, "limits.max_pending_requests", limits.max_pending_requests);

    let controller = &config.controller;
    check_positive(&mut errors, "controller.select_timeout_ms", controller.select_timeout_ms as usize);
    check_positive(&mut errors, "controller.startup_timeout_ms", controller.startup_timeout_ms as usize);
    check_positive(&mut errors, "controller.events_capacity", controller.events_capacity);

    check_positive(&mut errors, "pool.inbound_buffer_size", config.pool.inbound_buffer_size);
    check_positive(&mut errors, "pool.outbound_buffer_size", config.pool.outbound_buffer_size);
    check_positive(&mut errors, "pool.read_budget", config.pool.read_budget);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_limit(errors: &mut Vec<ValidationError>, field: &'static str, value: i64) {
    if value < UNLIMITED {
        errors.push(ValidationError::InvalidLimit { field, value });
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: usize) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}
