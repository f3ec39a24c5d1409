//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays > 0, multipliers >= 1, bounds ordered)
//! - Check that the gateway URL is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::config::schema::DispatchConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.gateway.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "gateway.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("gateway.base_url", e.to_string())),
    }
    if !config.gateway.chat_path.starts_with('/') {
        errors.push(ValidationError::new("gateway.chat_path", "must start with '/'"));
    }

    let policy = &config.timeouts.policy;
    for (field, value) in [
        ("timeouts.policy.slow_network_multiplier", policy.slow_network_multiplier),
        ("timeouts.policy.mobile_multiplier", policy.mobile_multiplier),
        ("timeouts.policy.hidden_multiplier", policy.hidden_multiplier),
    ] {
        if !value.is_finite() || value < 1.0 {
            errors.push(ValidationError::new(field, "must be a finite number >= 1.0"));
        }
    }
    for (field, value) in [
        ("timeouts.policy.min_ms", policy.min_ms),
        ("timeouts.policy.max_ms", policy.max_ms),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                errors.push(ValidationError::new(field, "must be a positive number"));
            }
        }
    }
    if let (Some(min), Some(max)) = (policy.min_ms, policy.max_ms) {
        if min > max {
            errors.push(ValidationError::new(
                "timeouts.policy",
                format!("min_ms ({}) exceeds max_ms ({})", min, max),
            ));
        }
    }

    let profiles = &config.timeouts.profiles;
    for (field, value) in [
        ("timeouts.profiles.buffered_ms", profiles.buffered_ms),
        ("timeouts.profiles.streaming_ms", profiles.streaming_ms),
        ("timeouts.profiles.extended_buffered_ms", profiles.extended_buffered_ms),
        ("timeouts.profiles.extended_streaming_ms", profiles.extended_streaming_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(ValidationError::new("retries.base_delay_ms", "must be greater than zero"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be at least retries.base_delay_ms",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.threshold", "must be at least 1"));
    }
    if breaker.half_open_budget == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_budget",
            "must be at least 1",
        ));
    }

    if let Some(downlink) = config.environment.as_ref().and_then(|e| e.downlink_mbps) {
        if !downlink.is_finite() || downlink < 0.0 {
            errors.push(ValidationError::new(
                "environment.downlink_mbps",
                "must be a non-negative number",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
