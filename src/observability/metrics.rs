//! Metrics collection.
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): logical calls by endpoint, outcome, streaming
//! - `dispatch_duration_seconds` (histogram): end-to-end latency including retries
//! - `dispatch_retries_total` (counter): retries by endpoint and failure category
//! - `circuit_transitions_total` (counter): breaker phase changes
//! - `circuit_rejections_total` (counter): calls refused by an open breaker
//! - `auth_fallbacks_total` (counter): 401s answered by an anonymous retry
//! - `stream_truncations_total` (counter): streams that ended in a transport error
//!
//! # Design Decisions
//! - Emits through the `metrics` facade; the embedding process picks the recorder
//! - Without a recorder every call is a no-op
//! - Labels stay low-cardinality: endpoint paths and category labels, never targets

use std::time::Duration;

use metrics::{counter, histogram};

use crate::error::ErrorCategory;
use crate::resilience::CircuitPhase;

/// Record the end of one logical dispatch. `outcome` is "success" or a category label.
pub fn record_dispatch(endpoint: &str, outcome: &str, streaming: bool, elapsed: Duration) {
    counter!(
        "dispatch_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string(),
        "streaming" => if streaming { "true" } else { "false" }
    )
    .increment(1);

    histogram!("dispatch_duration_seconds", "endpoint" => endpoint.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(endpoint: &str, category: ErrorCategory) {
    counter!(
        "dispatch_retries_total",
        "endpoint" => endpoint.to_string(),
        "category" => category.label()
    )
    .increment(1);
}

pub fn record_circuit_transition(endpoint: &str, phase: CircuitPhase) {
    counter!(
        "circuit_transitions_total",
        "endpoint" => endpoint.to_string(),
        "phase" => phase.as_str()
    )
    .increment(1);
}

pub fn record_circuit_rejection(endpoint: &str) {
    counter!("circuit_rejections_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_auth_fallback(endpoint: &str) {
    counter!("auth_fallbacks_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_stream_truncated(endpoint: &str) {
    counter!("stream_truncations_total", "endpoint" => endpoint.to_string()).increment(1);
}
