//! Dispatch request description.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::auth::Credential;

/// One logical call to the gateway.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    /// Logical endpoint path, also the circuit breaker key.
    pub endpoint: String,
    /// Resource identity, usually a model id. Selects the timeout profile.
    pub target: String,
    pub credential: Option<Credential>,
    pub body: Option<Value>,
    pub is_streaming: bool,
    /// Replaces the computed deadline when set.
    pub timeout_override: Option<Duration>,
    /// Sent as `x-request-id`. Generated per call when absent.
    pub correlation_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            target: String::new(),
            credential: None,
            body: None,
            is_streaming: false,
            timeout_override: None,
            correlation_id: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, endpoint).with_body(body)
    }

    /// Chat completion for `model`. The payload's `model` field is filled in when missing.
    pub fn chat(endpoint: impl Into<String>, model: impl Into<String>, mut payload: Value) -> Self {
        let model = model.into();
        if let Some(obj) = payload.as_object_mut() {
            obj.entry("model").or_insert_with(|| Value::String(model.clone()));
        }
        Self::post(endpoint, payload).with_target(model)
    }

    /// Request an event stream. Also sets `"stream": true` on an object body.
    pub fn streaming(mut self) -> Self {
        self.is_streaming = true;
        if let Some(obj) = self.body.as_mut().and_then(Value::as_object_mut) {
            obj.insert("stream".to_string(), Value::Bool(true));
        }
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Name used in errors and logs: the target, or the endpoint when there is none.
    pub fn display_target(&self) -> &str {
        if self.target.is_empty() {
            &self.endpoint
        } else {
            &self.target
        }
    }
}
