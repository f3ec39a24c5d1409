//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch call:
//!     → timeouts.rs (adaptive per-attempt deadline)
//!     → circuit_breaker.rs (admit or reject the logical call)
//!     → retries.rs (attempt loop, deadline per attempt)
//!         → On failure: backoff.rs (delay from category, server hint, jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Retries only for transient categories
//! - Circuit breaker prevents hammering an endpoint that is down
//! - Each piece is a plain function or type composed by the dispatcher

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitPhase, CircuitRegistry, CircuitSnapshot};
pub use retries::execute_with_retry;
pub use timeouts::{adaptive_timeout, adaptive_timeout_ms};
