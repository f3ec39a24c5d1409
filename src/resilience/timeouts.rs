//! Adaptive timeout computation.
//!
//! # Responsibilities
//! - Stretch a base timeout for slow networks, mobile devices and hidden contexts
//! - Keep the result inside `[min_ms, max_ms]` (defaults `[base, 4 * base]`)
//!
//! # Design Decisions
//! - Network effects multiply; mobile and hidden only raise a floor, so they never
//!   compound with network effects into an explosive deadline
//! - Pure: no clock, no I/O, no shared state
//! - Without a probe (headless) the base is returned as-is

use std::time::Duration;

use crate::config::TimeoutPolicy;
use crate::environment::{EnvironmentProbe, EnvironmentSignals, NetworkClass};

/// Extra factor applied on top of the slow-network multiplier for 2G-class links.
const VERY_SLOW_FACTOR: f64 = 1.3;
/// Downlink below this is treated as slow.
const SLOW_DOWNLINK_MBPS: f64 = 1.5;
const SAVE_DATA_FACTOR: f64 = 1.25;

/// Compute the effective timeout in milliseconds.
///
/// Non-finite or non-positive `base_ms` is returned unchanged.
pub fn adaptive_timeout_ms(
    base_ms: f64,
    policy: &TimeoutPolicy,
    probe: Option<&dyn EnvironmentProbe>,
) -> f64 {
    if !base_ms.is_finite() || base_ms <= 0.0 {
        return base_ms;
    }

    match probe {
        Some(probe) => adjust_for_signals(base_ms, policy, &probe.signals()),
        None => base_ms.ceil(),
    }
}

/// `Duration` form of [`adaptive_timeout_ms`].
pub fn adaptive_timeout(
    base: Duration,
    policy: &TimeoutPolicy,
    probe: Option<&dyn EnvironmentProbe>,
) -> Duration {
    let base_ms = base.as_secs_f64() * 1000.0;
    let ms = adaptive_timeout_ms(base_ms, policy, probe);
    if ms.is_finite() && ms > 0.0 {
        Duration::from_millis(ms as u64)
    } else {
        base
    }
}

fn adjust_for_signals(base_ms: f64, policy: &TimeoutPolicy, signals: &EnvironmentSignals) -> f64 {
    let slow = policy.slow_network_multiplier;
    let mut timeout = base_ms;

    match signals.network_class {
        Some(NetworkClass::Slow2g) | Some(NetworkClass::TwoG) => timeout *= slow * VERY_SLOW_FACTOR,
        Some(NetworkClass::ThreeG) => timeout *= slow,
        _ => {}
    }
    if let Some(downlink) = signals.downlink_mbps {
        if downlink < SLOW_DOWNLINK_MBPS {
            timeout *= (slow - 0.5).max(1.3);
        }
    }
    if signals.save_data == Some(true) {
        timeout *= SAVE_DATA_FACTOR;
    }

    if signals.is_mobile_like {
        timeout = timeout.max(base_ms * policy.mobile_multiplier);
    }
    if signals.is_hidden {
        timeout = timeout.max(base_ms * policy.hidden_multiplier);
    }

    let min = policy.min_ms.unwrap_or(base_ms);
    let max = policy.max_ms.unwrap_or(base_ms * 4.0);
    timeout.max(min).min(max).ceil()
}
