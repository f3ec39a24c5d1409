//! Dispatch results.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{AttemptError, DispatchError, ErrorCategory, RetryFailure};
use crate::observability::metrics;

/// Successful result of a dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Buffered JSON body. An empty body is `Value::Null`.
    Payload(Value),
    /// Raw event stream, forwarded as received.
    Stream(StreamHandle),
}

impl DispatchOutcome {
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Payload(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<StreamHandle> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Payload(_) => None,
        }
    }
}

/// Byte stream of an accepted streaming response.
///
/// The first chunk was already read while the call was still retryable. Any
/// transport error after that ends the stream with `StreamTruncated`; nothing is
/// retried.
pub struct StreamHandle {
    status: u16,
    first: Option<Bytes>,
    rest: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    endpoint: String,
    target: String,
    attempts: u32,
    started: Instant,
    delivered: u64,
}

impl StreamHandle {
    pub(crate) fn new(
        status: u16,
        first: Option<Bytes>,
        rest: BoxStream<'static, reqwest::Result<Bytes>>,
        endpoint: String,
        target: String,
        started: Instant,
    ) -> Self {
        Self {
            status,
            first,
            rest: Some(rest),
            endpoint,
            target,
            attempts: 1,
            started,
            delivered: 0,
        }
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Bytes handed to the consumer so far.
    pub fn bytes_delivered(&self) -> u64 {
        self.delivered
    }

    /// Drain the stream into memory.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, DispatchError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn truncated(&self, err: reqwest::Error) -> DispatchError {
        let error = AttemptError::new(
            ErrorCategory::StreamTruncated,
            format!(
                "Stream interrupted after {} bytes: {}",
                self.delivered, err
            ),
        )
        .with_status(self.status);

        DispatchError::from_failure(
            RetryFailure {
                error,
                attempts: self.attempts,
            },
            &self.target,
            &self.endpoint,
            self.started.elapsed(),
        )
    }
}

impl Stream for StreamHandle {
    type Item = Result<Bytes, DispatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            self.delivered += first.len() as u64;
            return Poll::Ready(Some(Ok(first)));
        }

        let Some(rest) = self.rest.as_mut() else {
            return Poll::Ready(None);
        };

        match rest.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.delivered += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.rest = None;
                let error = self.truncated(err);
                tracing::warn!(
                    endpoint = %self.endpoint,
                    target = %self.target,
                    bytes = self.delivered,
                    error = %error.message,
                    "Stream truncated"
                );
                metrics::record_stream_truncated(&self.endpoint);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.rest = None;
                tracing::debug!(
                    endpoint = %self.endpoint,
                    bytes = self.delivered,
                    "Stream complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("status", &self.status)
            .field("endpoint", &self.endpoint)
            .field("target", &self.target)
            .field("delivered", &self.delivered)
            .field("finished", &self.rest.is_none())
            .finish()
    }
}
