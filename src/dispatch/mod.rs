//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → request.rs (DispatchRequest: payload, streaming flag, target, credential)
//!     → profile.rs (base timeout from request shape and target)
//!     → dispatcher.rs (auth fallback → circuit breaker → retries → HTTP)
//!     → response.rs (JSON payload or StreamHandle)
//! ```
//!
//! # Design Decisions
//! - Only the connect/handshake phase of a stream is retried
//! - Once the first chunk is accepted, bytes are forwarded unbuffered
//! - Failures after that point end the stream with `StreamTruncated`

pub mod dispatcher;
pub mod profile;
pub mod request;
pub mod response;

pub use dispatcher::{Dispatcher, REQUEST_ID_HEADER};
pub use request::DispatchRequest;
pub use response::{DispatchOutcome, StreamHandle};
