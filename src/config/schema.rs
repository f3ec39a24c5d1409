//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatch layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::environment::NetworkClass;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Gateway connection settings.
    pub gateway: GatewayConfig,

    /// Base timeouts and adaptive policy.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker settings, shared by every endpoint.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Static environment signals. Absent means headless: no timeout adjustment.
    pub environment: Option<EnvironmentConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway origin (e.g., "http://127.0.0.1:8080").
    pub base_url: String,

    /// Path used for chat completions.
    pub chat_path: String,

    /// Bearer credential. Usually supplied through the environment instead.
    pub api_key: Option<String>,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            api_key: None,
            connect_timeout_ms: 10_000,
            user_agent: format!("llm-dispatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    pub policy: TimeoutPolicy,
    pub profiles: TimeoutProfiles,
}

/// Adaptive timeout policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Lower bound in milliseconds. Defaults to the base timeout.
    pub min_ms: Option<f64>,

    /// Upper bound in milliseconds. Defaults to four times the base timeout.
    pub max_ms: Option<f64>,

    pub slow_network_multiplier: f64,
    pub mobile_multiplier: f64,
    pub hidden_multiplier: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            min_ms: None,
            max_ms: None,
            slow_network_multiplier: 2.0,
            mobile_multiplier: 1.75,
            hidden_multiplier: 1.5,
        }
    }
}

/// Base timeouts by request shape.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutProfiles {
    pub buffered_ms: u64,
    pub streaming_ms: u64,

    /// Used when the target is a large model or served by a slow provider.
    pub extended_buffered_ms: u64,
    pub extended_streaming_ms: u64,

    /// Case-insensitive substrings marking a large model.
    pub large_model_markers: Vec<String>,

    /// Case-insensitive target prefixes of providers known to be slow.
    pub slow_provider_prefixes: Vec<String>,
}

impl Default for TimeoutProfiles {
    fn default() -> Self {
        Self {
            buffered_ms: 30_000,
            streaming_ms: 120_000,
            extended_buffered_ms: 180_000,
            extended_streaming_ms: 300_000,
            large_model_markers: [
                "70b", "72b", "90b", "110b", "120b", "180b", "235b", "405b", "480b", "671b",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            slow_provider_prefixes: ["deepseek/", "nousresearch/", "meta-llama/llama-3.1-405b"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts = max_retries + 1.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the uniform random jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_ms: 500,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,

    /// Time the circuit stays open before admitting a trial call.
    pub cooldown_ms: u64,

    /// Trial calls admitted while half-open.
    pub half_open_budget: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_ms: 30_000,
            half_open_budget: 1,
        }
    }
}

/// Static environment signals.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub network_class: Option<NetworkClass>,
    pub downlink_mbps: Option<f64>,
    pub save_data: Option<bool>,

    /// Sniffed for mobile markers when `mobile` is unset.
    pub user_agent: Option<String>,
    pub mobile: Option<bool>,
    pub hidden: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
