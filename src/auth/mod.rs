//! Auth fallback controller.
//!
//! # Data Flow
//! ```text
//! call with credential
//!     → 401 → RefreshNeeded sent on the notifier channel (auth subsystem decides)
//!           → same call retried once without the credential
//!                 → 401 again → terminal AuthError
//!     → 404 on read/list endpoints → empty/None via `not_found_as_none`
//! ```
//!
//! # Design Decisions
//! - This layer never deletes or rotates credentials; it only reports
//! - The notification is fire-and-forget; a closed receiver is not an error
//! - At most one fallback per logical call

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::error::{Categorized, ErrorCategory};
use crate::observability::metrics;

/// Bearer credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// "Credentials may be invalid, please refresh."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshNeeded {
    pub target: String,
    pub endpoint: String,
    pub correlation_id: String,
    pub reason: String,
}

/// Sending half of the refresh channel.
#[derive(Debug, Clone)]
pub struct AuthNotifier {
    tx: mpsc::UnboundedSender<RefreshNeeded>,
}

impl AuthNotifier {
    /// Create a notifier and the receiver the auth subsystem reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RefreshNeeded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, event: RefreshNeeded) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Auth refresh receiver dropped; notification discarded");
        }
    }
}

/// Identity of the call being protected, for notifications and logs.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub target: &'a str,
    pub endpoint: &'a str,
    pub correlation_id: &'a str,
}

/// Retries a 401 once without the credential.
#[derive(Debug, Clone, Default)]
pub struct AuthFallback {
    notifier: Option<AuthNotifier>,
}

impl AuthFallback {
    pub fn new(notifier: Option<AuthNotifier>) -> Self {
        Self { notifier }
    }

    /// Run `call` with `credential`; on 401 run it again with `None`.
    ///
    /// Without a credential a 401 is returned as-is.
    pub async fn run<'c, T, E, F, Fut>(
        &self,
        credential: Option<&'c Credential>,
        ctx: CallContext<'_>,
        mut call: F,
    ) -> Result<T, E>
    where
        F: FnMut(Option<&'c Credential>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorized + fmt::Display,
    {
        let first = call(credential).await;
        let err = match first {
            Err(err) if credential.is_some() && err.category() == ErrorCategory::Auth => err,
            other => return other,
        };

        tracing::warn!(
            endpoint = %ctx.endpoint,
            target = %ctx.target,
            correlation_id = %ctx.correlation_id,
            "Credential rejected; retrying without it"
        );
        metrics::record_auth_fallback(ctx.endpoint);
        if let Some(notifier) = &self.notifier {
            notifier.notify(RefreshNeeded {
                target: ctx.target.to_string(),
                endpoint: ctx.endpoint.to_string(),
                correlation_id: ctx.correlation_id.to_string(),
                reason: err.to_string(),
            });
        }

        call(None).await
    }
}

/// Map a NotFound failure to `Ok(None)`.
pub fn not_found_as_none<T, E: Categorized>(result: Result<T, E>) -> Result<Option<T>, E> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.category() == ErrorCategory::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
