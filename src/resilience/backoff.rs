//! Exponential backoff with jitter and server-directed delays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::ErrorCategory;

/// Calculate the backoff before the retry that follows failed attempt `attempt` (0-based).
///
/// Gateway failures start from twice the base delay. No jitter is applied here.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, category: ErrorCategory) -> Duration {
    let start_ms = match category {
        ErrorCategory::Gateway(_) => base_ms.saturating_mul(2),
        _ => base_ms,
    };
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = start_ms.saturating_mul(exponential_base);

    Duration::from_millis(delay_ms.min(max_ms))
}

/// Combine computed backoff with an optional server hint.
///
/// The hint is capped at `max_ms` and can only lengthen the wait.
pub fn with_server_hint(backoff: Duration, hint: Option<Duration>, max_ms: u64) -> Duration {
    match hint {
        Some(hint) => backoff.max(hint.min(Duration::from_millis(max_ms))),
        None => backoff,
    }
}

/// Uniform jitter in `[0, max_jitter_ms]`.
pub fn jitter(max_jitter_ms: u64) -> Duration {
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}

/// Full delay before the next retry: backoff, hint, then jitter.
pub fn retry_delay(
    policy: &RetryConfig,
    attempt: u32,
    category: ErrorCategory,
    hint: Option<Duration>,
) -> Duration {
    let backoff = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms, category);
    with_server_hint(backoff, hint, policy.max_delay_ms) + jitter(policy.jitter_ms)
}

/// Parse a `Retry-After` value: delta seconds (integer or decimal) or an HTTP-date.
///
/// Seconds are rounded up to whole milliseconds. Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<f64>() {
        return seconds_to_duration(secs);
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta_ms = date.with_timezone(&Utc).signed_duration_since(now).num_milliseconds();
    Some(Duration::from_millis(delta_ms.max(0) as u64))
}

/// `retry_after` hint inside a JSON error body.
pub fn body_retry_after(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let hint = value
        .get("retry_after")
        .or_else(|| value.pointer("/error/retry_after"))?;

    match hint {
        serde_json::Value::Number(n) => seconds_to_duration(n.as_f64()?),
        serde_json::Value::String(s) => parse_retry_after(s, Utc::now()),
        _ => None,
    }
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_millis((secs * 1000.0).ceil() as u64))
}
