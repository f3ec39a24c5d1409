//! Request dispatcher.
//!
//! # Responsibilities
//! - Pick the per-attempt deadline (profile, then environment, or the override)
//! - Compose auth fallback, circuit breaker and retries around one HTTP attempt
//! - Deliver either a parsed JSON payload or a raw byte stream
//! - Turn every terminal failure into a `DispatchError`
//!
//! # Data Flow
//! ```text
//! DispatchRequest
//!     → AuthFallback::run (401 → notify, one anonymous retry)
//!         → CircuitBreaker::call (per endpoint)
//!             → execute_with_retry (deadline per attempt)
//!                 → send_once (HTTP; first chunk read for streams)
//!     → DispatchOutcome | DispatchError
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::auth::{not_found_as_none, AuthFallback, AuthNotifier, CallContext, Credential};
use crate::config::{validate_config, ConfigError, DispatchConfig, ValidationError};
use crate::dispatch::profile::base_timeout;
use crate::dispatch::request::DispatchRequest;
use crate::dispatch::response::{DispatchOutcome, StreamHandle};
use crate::environment::{EnvironmentProbe, StaticProbe};
use crate::error::{AttemptError, DispatchError, ErrorCategory, RetryFailure};
use crate::observability::metrics;
use crate::resilience::retries::execute_with_retry;
use crate::resilience::timeouts::adaptive_timeout;
use crate::resilience::CircuitRegistry;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-call values every attempt needs.
struct CallScope<'a> {
    request: &'a DispatchRequest,
    correlation_id: &'a str,
    started: Instant,
}

/// Resilient client for the gateway.
pub struct Dispatcher {
    client: Client,
    base_url: String,
    config: Arc<DispatchConfig>,
    credential: Option<Credential>,
    probe: Option<Arc<dyn EnvironmentProbe>>,
    circuits: Arc<CircuitRegistry>,
    auth: AuthFallback,
}

impl Dispatcher {
    /// Build from a validated configuration.
    ///
    /// The probe comes from `[environment]`; without that section the dispatcher is headless.
    pub fn new(config: DispatchConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let base = Url::parse(&config.gateway.base_url).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("gateway.base_url", e.to_string())])
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.gateway.connect_timeout_ms))
            .user_agent(config.gateway.user_agent.clone())
            .build()?;

        let probe = config
            .environment
            .as_ref()
            .map(|env| Arc::new(StaticProbe::from_config(env)) as Arc<dyn EnvironmentProbe>);
        let credential = config.gateway.api_key.clone().map(Credential::new);
        let circuits = Arc::new(CircuitRegistry::new(config.circuit_breaker.clone()));

        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            config: Arc::new(config),
            credential,
            probe,
            circuits,
            auth: AuthFallback::default(),
        })
    }

    /// Replace the environment probe. `None` means headless.
    pub fn with_probe(mut self, probe: Option<Arc<dyn EnvironmentProbe>>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_auth_notifier(mut self, notifier: AuthNotifier) -> Self {
        self.auth = AuthFallback::new(Some(notifier));
        self
    }

    /// Default credential for requests that carry none.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Share breakers with other dispatchers talking to the same gateway.
    pub fn with_circuits(mut self, circuits: Arc<CircuitRegistry>) -> Self {
        self.circuits = circuits;
        self
    }

    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Chat completion request on the configured chat path.
    pub fn chat_request(&self, model: &str, payload: Value) -> DispatchRequest {
        DispatchRequest::chat(self.config.gateway.chat_path.clone(), model, payload)
    }

    /// Effective per-attempt deadline for `target`.
    pub fn timeout_for(&self, target: &str, is_streaming: bool) -> Duration {
        let base = base_timeout(target, is_streaming, &self.config.timeouts.profiles);
        adaptive_timeout(base, &self.config.timeouts.policy, self.probe.as_deref())
    }

    fn deadline(&self, request: &DispatchRequest) -> Duration {
        request
            .timeout_override
            .unwrap_or_else(|| self.timeout_for(&request.target, request.is_streaming))
    }

    /// Run one logical call.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let deadline = self.deadline(&request);
        let target = request.display_target().to_string();
        let span = tracing::info_span!(
            "dispatch",
            endpoint = %request.endpoint,
            target = %target,
            correlation_id = %correlation_id,
            streaming = request.is_streaming,
        );

        let result = self
            .run(&request, &correlation_id, deadline, started)
            .instrument(span)
            .await;

        let elapsed = started.elapsed();
        match result {
            Ok(outcome) => {
                metrics::record_dispatch(&request.endpoint, "success", request.is_streaming, elapsed);
                tracing::debug!(
                    endpoint = %request.endpoint,
                    target = %target,
                    correlation_id = %correlation_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Dispatch succeeded"
                );
                Ok(outcome)
            }
            Err(failure) => {
                let error = DispatchError::from_failure(failure, &target, &request.endpoint, elapsed);
                metrics::record_dispatch(
                    &request.endpoint,
                    error.category.label(),
                    request.is_streaming,
                    elapsed,
                );
                tracing::warn!(
                    endpoint = %request.endpoint,
                    target = %target,
                    correlation_id = %correlation_id,
                    category = %error.category,
                    status = ?error.status,
                    attempts = error.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Dispatch failed: {}",
                    error.message
                );
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &DispatchRequest,
        correlation_id: &str,
        deadline: Duration,
        started: Instant,
    ) -> Result<DispatchOutcome, RetryFailure> {
        let breaker = self.circuits.breaker(&request.endpoint);
        let breaker = &breaker;
        let scope = CallScope {
            request,
            correlation_id,
            started,
        };
        let scope = &scope;
        let ctx = CallContext {
            target: request.display_target(),
            endpoint: &request.endpoint,
            correlation_id,
        };
        let credential = request.credential.as_ref().or(self.credential.as_ref());

        self.auth
            .run(credential, ctx, move |credential| async move {
                breaker
                    .call(|| {
                        execute_with_retry(
                            &self.config.retries,
                            deadline,
                            &scope.request.endpoint,
                            move |attempt| self.send_once(scope, credential, attempt),
                        )
                    })
                    .await
            })
            .await
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// One HTTP attempt. Cancelled by the caller's deadline.
    async fn send_once(
        &self,
        scope: &CallScope<'_>,
        credential: Option<&Credential>,
        attempt: u32,
    ) -> Result<DispatchOutcome, AttemptError> {
        let request = scope.request;
        tracing::debug!(
            endpoint = %request.endpoint,
            attempt = attempt + 1,
            authenticated = credential.is_some(),
            "Sending request"
        );

        let accept = if request.is_streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.endpoint))
            .header(REQUEST_ID_HEADER, scope.correlation_id)
            .header(ACCEPT, accept);
        if let Some(credential) = credential {
            builder = builder.header(AUTHORIZATION, credential.bearer());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(AttemptError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::from_response(response).await);
        }

        if request.is_streaming {
            let mut stream = response.bytes_stream().boxed();
            let first = match stream.next().await {
                Some(Ok(chunk)) => Some(chunk),
                Some(Err(err)) => return Err(AttemptError::from_transport(err)),
                None => None,
            };
            let mut handle = StreamHandle::new(
                status.as_u16(),
                first,
                stream,
                request.endpoint.clone(),
                request.display_target().to_string(),
                scope.started,
            );
            handle.set_attempts(attempt + 1);
            return Ok(DispatchOutcome::Stream(handle));
        }

        let text = response.text().await.map_err(AttemptError::from_transport)?;
        if text.trim().is_empty() {
            return Ok(DispatchOutcome::Payload(Value::Null));
        }
        serde_json::from_str(&text)
            .map(DispatchOutcome::Payload)
            .map_err(|e| AttemptError::parse(e, text).with_status(status.as_u16()))
    }

    /// Buffered GET; a 404 is `Ok(None)`.
    pub async fn fetch_optional(&self, path: &str) -> Result<Option<Value>, DispatchError> {
        let result = self.dispatch(DispatchRequest::get(path)).await;
        Ok(not_found_as_none(result)?.map(|outcome| outcome.into_payload().unwrap_or_default()))
    }

    /// Buffered GET of a collection; a 404 is an empty list.
    ///
    /// Accepts a bare array or an object with a `data` array.
    pub async fn fetch_list(&self, path: &str) -> Result<Vec<Value>, DispatchError> {
        let started = Instant::now();
        let payload = match self.fetch_optional(path).await? {
            Some(payload) => payload,
            None => return Ok(Vec::new()),
        };

        match payload {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(items),
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(items)) => Ok(items),
                Some(Value::Null) | None if obj.is_empty() => Ok(Vec::new()),
                _ => Err(unexpected_shape(path, started)),
            },
            _ => Err(unexpected_shape(path, started)),
        }
    }
}

fn unexpected_shape(path: &str, started: Instant) -> DispatchError {
    let failure = RetryFailure {
        error: AttemptError::new(ErrorCategory::Parse, "Expected a JSON array or a `data` array"),
        attempts: 1,
    };
    DispatchError::from_failure(failure, path, path, started.elapsed())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.base_url)
            .field("headless", &self.probe.is_none())
            .field("credential", &self.credential)
            .finish()
    }
}
