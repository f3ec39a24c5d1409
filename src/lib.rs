//! Resilient request dispatch for an LLM gateway.
//!
//! Adaptive timeouts, bounded retries with backoff, per-endpoint circuit
//! breaking and a one-shot auth fallback, for both buffered JSON calls and
//! streamed responses.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod observability;
pub mod resilience;

pub use config::DispatchConfig;
pub use dispatch::{DispatchOutcome, DispatchRequest, Dispatcher, StreamHandle};
pub use error::{DispatchError, ErrorCategory};
