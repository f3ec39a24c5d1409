//! Failure taxonomy for the dispatch layer.
//!
//! # Data Flow
//! ```text
//! transport error / non-2xx response / bad JSON / deadline
//!     → AttemptError (one attempt, carries Retry-After hint)
//!     → RetryFailure (orchestrator gave up, counts attempts)
//!     → DispatchError (terminal, what the caller sees)
//! ```
//!
//! # Design Decisions
//! - Classification happens once, at the edge, into `ErrorCategory`
//! - Everything downstream (retry, circuit breaker, auth fallback) only looks at the category

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use thiserror::Error;

use crate::resilience::backoff::{body_retry_after, parse_retry_after};

/// Subtype of a gateway (502/503/504) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
}

impl GatewayKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            502 => Some(Self::BadGateway),
            503 => Some(Self::ServiceUnavailable),
            504 => Some(Self::GatewayTimeout),
            _ => None,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }

    /// Canonical reason phrase.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// Classified failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    RateLimit,
    Gateway(GatewayKind),
    Auth,
    NotFound,
    ClientError,
    ServerError,
    Parse,
    CircuitOpen,
    StreamTruncated,
}

impl ErrorCategory {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        if let Some(kind) = GatewayKind::from_status(status) {
            return Self::Gateway(kind);
        }
        match status {
            401 => Self::Auth,
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    /// Transient categories are retried by the orchestrator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimit | Self::Gateway(_)
        )
    }

    /// Whether this outcome says the endpoint itself is unhealthy.
    ///
    /// Auth, NotFound, ClientError and Parse mean the endpoint answered.
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable() || matches!(self, Self::ServerError)
    }

    /// Message used once retries are exhausted.
    pub fn terminal_message(&self) -> Option<&'static str> {
        match self {
            Self::RateLimit => Some("Rate limit exceeded"),
            Self::Gateway(kind) => Some(kind.reason()),
            Self::Timeout => Some("Request timed out"),
            Self::Network => Some("Network error"),
            _ => None,
        }
    }

    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Gateway(GatewayKind::BadGateway) => "bad_gateway",
            Self::Gateway(GatewayKind::ServiceUnavailable) => "service_unavailable",
            Self::Gateway(GatewayKind::GatewayTimeout) => "gateway_timeout",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::Parse => "parse",
            Self::CircuitOpen => "circuit_open",
            Self::StreamTruncated => "stream_truncated",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "TimeoutError",
            Self::Network => "NetworkError",
            Self::RateLimit => "RateLimitError",
            Self::Gateway(_) => "GatewayError",
            Self::Auth => "AuthError",
            Self::NotFound => "NotFoundError",
            Self::ClientError => "ClientError",
            Self::ServerError => "ServerError",
            Self::Parse => "ParseError",
            Self::CircuitOpen => "CircuitOpenError",
            Self::StreamTruncated => "StreamTruncatedError",
        };
        f.write_str(name)
    }
}

/// Anything that can report its failure category.
pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

/// Failure of a single attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AttemptError {
    pub category: ErrorCategory,
    pub message: String,
    pub status: Option<u16>,
    /// Server-provided delay before the next attempt.
    pub retry_after: Option<Duration>,
    /// Raw response text, kept for diagnostics.
    pub raw_body: Option<String>,
}

impl AttemptError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status: None,
            retry_after: None,
            raw_body: None,
        }
    }

    /// The attempt deadline fired before the attempt finished.
    pub fn timeout(deadline: Duration) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("Request timed out after {} ms", deadline.as_millis()),
        )
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_raw_body(mut self, body: impl Into<String>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    /// Response text that was not valid JSON.
    pub fn parse(err: serde_json::Error, raw: String) -> Self {
        Self::new(
            ErrorCategory::Parse,
            format!("Failed to parse gateway response as JSON: {}", err),
        )
        .with_raw_body(raw)
    }

    /// Classify a transport-level failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_decode() {
            ErrorCategory::Parse
        } else if err.is_builder() {
            ErrorCategory::ClientError
        } else {
            ErrorCategory::Network
        };
        let mut error = Self::new(category, format!("Gateway request failed: {}", err));
        error.status = err.status().map(|s| s.as_u16());
        error
    }

    /// Classify a non-success response, consuming its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let header_hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let body = response.text().await.unwrap_or_default();
        Self::from_status_parts(status, header_hint, body)
    }

    /// Build from an already-read status, header hint and body.
    pub fn from_status_parts(status: u16, header_hint: Option<Duration>, body: String) -> Self {
        let category = ErrorCategory::from_status(status);
        let message = extract_error_message(&body)
            .unwrap_or_else(|| default_status_message(category, status));

        let mut error = Self::new(category, message).with_status(status);
        error.retry_after = header_hint.or_else(|| body_retry_after(&body));
        if !body.is_empty() {
            error.raw_body = Some(body);
        }
        error
    }

    /// Rewrite into the terminal form once retries are exhausted.
    pub fn exhausted(mut self, attempts: u32) -> Self {
        if let Some(terminal) = self.category.terminal_message() {
            self.message = if self.message == terminal {
                format!("{} after {} attempts", terminal, attempts)
            } else {
                format!("{} after {} attempts: {}", terminal, attempts, self.message)
            };
        }
        self
    }
}

impl Categorized for AttemptError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

fn default_status_message(category: ErrorCategory, status: u16) -> String {
    match category {
        ErrorCategory::Gateway(kind) => kind.reason().to_string(),
        ErrorCategory::RateLimit => "Rate limit exceeded".to_string(),
        ErrorCategory::Auth => "Authentication required".to_string(),
        ErrorCategory::NotFound => "Resource not found".to_string(),
        ErrorCategory::ServerError => format!("Gateway server error (status {})", status),
        _ => format!("Gateway rejected the request (status {})", status),
    }
}

/// Pull a human-readable message out of a JSON error body.
///
/// Accepts `{"error": {"message": ..}}`, `{"error": ".."}`, `{"detail": ".."}`
/// and `{"message": ".."}`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let text = ["/error/message", "/error", "/detail", "/message"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(serde_json::Value::as_str))?
        .trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Circuit breaker refused the call without invoking it.
#[derive(Debug, Clone, Error)]
#[error("Circuit open for {endpoint}; next trial in {retry_in:?}")]
pub struct CircuitOpenError {
    pub endpoint: String,
    pub retry_in: Duration,
}

impl Categorized for CircuitOpenError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::CircuitOpen
    }
}

/// The retry orchestrator gave up.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct RetryFailure {
    pub error: AttemptError,
    /// Network attempts actually made.
    pub attempts: u32,
}

impl Categorized for RetryFailure {
    fn category(&self) -> ErrorCategory {
        self.error.category
    }
}

impl From<CircuitOpenError> for RetryFailure {
    fn from(err: CircuitOpenError) -> Self {
        Self {
            error: AttemptError::new(ErrorCategory::CircuitOpen, err.to_string()),
            attempts: 0,
        }
    }
}

/// Terminal failure handed to the caller.
#[derive(Debug, Clone, Error)]
#[error("{category} calling {target}: {message}")]
pub struct DispatchError {
    pub category: ErrorCategory,
    pub message: String,
    pub status: Option<u16>,
    /// Resource identity the call was for (usually a model id).
    pub target: String,
    /// Logical endpoint path.
    pub endpoint: String,
    pub elapsed: Duration,
    pub attempts: u32,
    pub raw_body: Option<String>,
}

impl DispatchError {
    pub fn from_failure(
        failure: RetryFailure,
        target: &str,
        endpoint: &str,
        elapsed: Duration,
    ) -> Self {
        let RetryFailure { error, attempts } = failure;
        Self {
            category: error.category,
            message: error.message,
            status: error.status,
            target: target.to_string(),
            endpoint: endpoint.to_string(),
            elapsed,
            attempts,
            raw_body: error.raw_body,
        }
    }

    /// Transient failures; the caller may offer a plain "try again".
    pub fn offers_retry(&self) -> bool {
        self.category.is_retryable() || self.category == ErrorCategory::CircuitOpen
    }

    pub fn is_auth_failure(&self) -> bool {
        self.category == ErrorCategory::Auth
    }
}

impl Categorized for DispatchError {
    fn category(&self) -> ErrorCategory {
        self.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorCategory::from_status(429), ErrorCategory::RateLimit);
        assert_eq!(
            ErrorCategory::from_status(502),
            ErrorCategory::Gateway(GatewayKind::BadGateway)
        );
        assert_eq!(
            ErrorCategory::from_status(503),
            ErrorCategory::Gateway(GatewayKind::ServiceUnavailable)
        );
        assert_eq!(
            ErrorCategory::from_status(504),
            ErrorCategory::Gateway(GatewayKind::GatewayTimeout)
        );
        assert_eq!(ErrorCategory::from_status(401), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::from_status(404), ErrorCategory::NotFound);
        assert_eq!(ErrorCategory::from_status(403), ErrorCategory::ClientError);
        assert_eq!(ErrorCategory::from_status(422), ErrorCategory::ClientError);
        assert_eq!(ErrorCategory::from_status(500), ErrorCategory::ServerError);
        assert_eq!(ErrorCategory::from_status(501), ErrorCategory::ServerError);
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Gateway(GatewayKind::GatewayTimeout).is_retryable());

        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::ClientError.is_retryable());
        assert!(!ErrorCategory::ServerError.is_retryable());
        assert!(!ErrorCategory::Parse.is_retryable());
    }

    #[test]
    fn test_breaker_accounting() {
        assert!(ErrorCategory::ServerError.trips_breaker());
        assert!(ErrorCategory::Network.trips_breaker());
        assert!(!ErrorCategory::Auth.trips_breaker());
        assert!(!ErrorCategory::ClientError.trips_breaker());
    }

    #[test]
    fn test_message_extraction() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"model overloaded"}}"#).as_deref(),
            Some("model overloaded")
        );
        assert_eq!(
            extract_error_message(r#"{"detail":"Upstream rate limit exceeded"}"#).as_deref(),
            Some("Upstream rate limit exceeded")
        );
        assert_eq!(extract_error_message("<html>oops</html>"), None);
        assert_eq!(extract_error_message(r#"{"detail":"  "}"#), None);
        assert_eq!(
            extract_error_message(r#"{"error":{"code":429},"detail":"slow down"}"#).as_deref(),
            Some("slow down")
        );
        assert_eq!(
            extract_error_message(r#"{"error":"quota exceeded","message":"ignored"}"#).as_deref(),
            Some("quota exceeded")
        );
    }

    #[test]
    fn test_exhausted_message_names_category() {
        let err = AttemptError::from_status_parts(502, None, String::new()).exhausted(4);
        assert_eq!(err.message, "Bad Gateway after 4 attempts");

        let err = AttemptError::from_status_parts(429, None, r#"{"detail":"slow down"}"#.into())
            .exhausted(2);
        assert!(err.message.starts_with("Rate limit exceeded"));
        assert!(err.message.contains("slow down"));
    }

    #[test]
    fn test_body_retry_after_hint() {
        let err = AttemptError::from_status_parts(429, None, r#"{"retry_after": 2}"#.into());
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));

        let err = AttemptError::from_status_parts(
            429,
            Some(Duration::from_secs(7)),
            r#"{"retry_after": 2}"#.into(),
        );
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
    }
}
