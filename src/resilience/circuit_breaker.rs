//! Circuit breaker for gateway endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: cooldown elapsed since last failure (failure_count reset)
//! Half-Open → Closed: a trial call succeeds
//! Half-Open → Open: a trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per logical endpoint, owned by a registry and shared by reference
//! - Each transition is a single critical section; the lock is never held across `.await`
//! - A permit dropped without an outcome counts as a failure
//! - Permits carry the phase generation they were issued in; only permits from the
//!   current half-open window decide whether it closes or reopens

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{Categorized, CircuitOpenError};
use crate::observability::metrics;

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct CircuitState {
    phase: CircuitPhase,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// Trial permits handed out in the current half-open window.
    half_open_issued: u32,
    /// Bumped on every phase change.
    generation: u64,
    admitted_calls: u64,
    rejected_calls: u64,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_count: 0,
            last_failure_at: None,
            half_open_issued: 0,
            generation: 0,
            admitted_calls: 0,
            rejected_calls: 0,
        }
    }
}

/// Serializable view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub admitted_calls: u64,
    pub rejected_calls: u64,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ms_ago: Option<u64>,
}

/// Stateful guard for one logical endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.cooldown_ms)
    }

    /// Ask to make a call. Rejects without side effects on the endpoint when open.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CircuitPermit, CircuitOpenError> {
        let now = Instant::now();
        let mut state = self.lock();

        match state.phase {
            CircuitPhase::Closed => {
                state.admitted_calls += 1;
                Ok(self.permit(state.generation))
            }
            CircuitPhase::Open => {
                let since_failure = state
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at));
                match since_failure {
                    Some(elapsed) if elapsed <= self.cooldown() => {
                        state.rejected_calls += 1;
                        drop(state);
                        metrics::record_circuit_rejection(&self.endpoint);
                        Err(CircuitOpenError {
                            endpoint: self.endpoint.clone(),
                            retry_in: self.cooldown().saturating_sub(elapsed),
                        })
                    }
                    _ => {
                        state.phase = CircuitPhase::HalfOpen;
                        state.generation += 1;
                        state.failure_count = 0;
                        state.half_open_issued = 1;
                        state.admitted_calls += 1;
                        let generation = state.generation;
                        drop(state);
                        self.log_transition(CircuitPhase::HalfOpen);
                        Ok(self.permit(generation))
                    }
                }
            }
            CircuitPhase::HalfOpen => {
                if state.half_open_issued < self.config.half_open_budget {
                    state.half_open_issued += 1;
                    state.admitted_calls += 1;
                    Ok(self.permit(state.generation))
                } else {
                    state.rejected_calls += 1;
                    drop(state);
                    metrics::record_circuit_rejection(&self.endpoint);
                    Err(CircuitOpenError {
                        endpoint: self.endpoint.clone(),
                        retry_in: Duration::ZERO,
                    })
                }
            }
        }
    }

    fn permit(self: &Arc<Self>, generation: u64) -> CircuitPermit {
        CircuitPermit {
            breaker: Arc::clone(self),
            generation,
            settled: false,
        }
    }

    fn on_success(&self, generation: u64) {
        let mut state = self.lock();
        let transition = match state.phase {
            CircuitPhase::Closed => {
                state.failure_count = 0;
                None
            }
            CircuitPhase::HalfOpen if generation == state.generation => {
                state.phase = CircuitPhase::Closed;
                state.generation += 1;
                state.failure_count = 0;
                state.half_open_issued = 0;
                Some(CircuitPhase::Closed)
            }
            // Late outcome from an earlier phase; trial calls decide.
            CircuitPhase::HalfOpen | CircuitPhase::Open => None,
        };
        drop(state);

        if let Some(phase) = transition {
            self.log_transition(phase);
        }
    }

    fn on_failure(&self, generation: u64) {
        let now = Instant::now();
        let mut state = self.lock();

        let transition = match state.phase {
            CircuitPhase::Closed => {
                state.failure_count = state.failure_count.saturating_add(1);
                state.last_failure_at = Some(now);
                if state.failure_count >= self.config.threshold {
                    state.phase = CircuitPhase::Open;
                    state.generation += 1;
                    Some(CircuitPhase::Open)
                } else {
                    None
                }
            }
            CircuitPhase::HalfOpen if generation == state.generation => {
                state.failure_count = state.failure_count.saturating_add(1);
                state.phase = CircuitPhase::Open;
                state.generation += 1;
                state.last_failure_at = Some(now);
                state.half_open_issued = 0;
                Some(CircuitPhase::Open)
            }
            // Late outcome of a call admitted in an earlier phase.
            CircuitPhase::HalfOpen | CircuitPhase::Open => None,
        };
        let failures = state.failure_count;
        drop(state);

        if let Some(phase) = transition {
            tracing::warn!(
                endpoint = %self.endpoint,
                failures = failures,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit opened"
            );
            metrics::record_circuit_transition(&self.endpoint, phase);
        }
    }

    fn log_transition(&self, phase: CircuitPhase) {
        tracing::info!(endpoint = %self.endpoint, phase = phase.as_str(), "Circuit transition");
        metrics::record_circuit_transition(&self.endpoint, phase);
    }

    /// Current phase. Does not advance Open → Half-Open.
    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Force Closed and clear failure history. Administrative use only.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.phase = CircuitPhase::Closed;
        state.generation += 1;
        state.failure_count = 0;
        state.last_failure_at = None;
        state.half_open_issued = 0;
        drop(state);
        tracing::info!(endpoint = %self.endpoint, "Circuit reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            endpoint: self.endpoint.clone(),
            phase: state.phase,
            failure_count: state.failure_count,
            admitted_calls: state.admitted_calls,
            rejected_calls: state.rejected_calls,
            last_failure_ms_ago: state
                .last_failure_at
                .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64),
        }
    }

    /// Run `call` under the breaker.
    ///
    /// Outcomes whose category does not trip the breaker are recorded as successes.
    pub async fn call<T, E, F, Fut>(self: &Arc<Self>, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized + From<CircuitOpenError>,
    {
        let permit = self.try_acquire()?;
        let result = call().await;
        match &result {
            Err(err) if err.category().trips_breaker() => permit.record_failure(),
            _ => permit.record_success(),
        }
        result
    }
}

/// Admission ticket for one call. Must be settled with an outcome.
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    settled: bool,
}

impl CircuitPermit {
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(endpoint = %self.breaker.endpoint, "Call abandoned; counting as failure");
            self.breaker.on_failure(self.generation);
        }
    }
}

/// Process-lifetime breakers keyed by logical endpoint.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `endpoint`, created on first use.
    pub fn breaker(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())))
            .value()
            .clone()
    }

    /// Reset one endpoint. Returns false if it was never used.
    pub fn reset(&self, endpoint: &str) -> bool {
        match self.breakers.get(endpoint) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        snapshots
    }
}
