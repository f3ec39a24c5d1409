//! Streaming dispatch: handshake retries, passthrough, truncation.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use llm_dispatch::resilience::CircuitPhase;
use llm_dispatch::{DispatchOutcome, Dispatcher, ErrorCategory, StreamHandle};

mod common;
use common::{test_config, MockGateway, MockReply};

const CHUNKS: [&str; 3] = [
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: [DONE]\n\n",
];

fn stream_request(dispatcher: &Dispatcher) -> llm_dispatch::DispatchRequest {
    dispatcher
        .chat_request(
            "openai/gpt-4o",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .streaming()
}

fn expect_stream(outcome: DispatchOutcome) -> StreamHandle {
    match outcome {
        DispatchOutcome::Stream(handle) => handle,
        DispatchOutcome::Payload(payload) => panic!("expected a stream, got {}", payload),
    }
}

#[tokio::test]
async fn test_stream_is_forwarded_unchanged() {
    let gateway = MockGateway::always(MockReply::stream(&CHUNKS)).await;
    let dispatcher = Dispatcher::new(test_config(&gateway)).unwrap();

    let handle = expect_stream(dispatcher.dispatch(stream_request(&dispatcher)).await.unwrap());
    assert_eq!(handle.status(), 200);
    let bytes = handle.collect_bytes().await.unwrap();

    assert_eq!(String::from_utf8(bytes).unwrap(), CHUNKS.concat());
    assert_eq!(gateway.calls(), 1);

    let request = &gateway.requests()[0];
    assert_eq!(request.path, "/v1/chat/completions");
    assert_eq!(request.header("accept"), Some("text/event-stream"));
    assert_eq!(request.json()["stream"], true);
    assert_eq!(request.json()["model"], "openai/gpt-4o");
}

#[tokio::test]
async fn test_truncated_stream_is_terminal_and_not_retried() {
    let gateway = MockGateway::always(MockReply::stream(&CHUNKS[..1]).truncated()).await;
    let dispatcher = Dispatcher::new(test_config(&gateway)).unwrap();

    let mut handle =
        expect_stream(dispatcher.dispatch(stream_request(&dispatcher)).await.unwrap());

    let first = handle.next().await.unwrap().unwrap();
    assert_eq!(&first[..], CHUNKS[0].as_bytes());

    let err = handle.next().await.unwrap().unwrap_err();
    assert_eq!(err.category, ErrorCategory::StreamTruncated);
    assert_eq!(err.target, "openai/gpt-4o");
    assert!(handle.next().await.is_none(), "stream ends after truncation");
    assert_eq!(handle.bytes_delivered(), CHUNKS[0].len() as u64);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.calls(), 1, "a started stream is never retried");

    // The handshake succeeded, so the endpoint is not counted as failing.
    let breaker = dispatcher.circuits().breaker("/v1/chat/completions");
    assert_eq!(breaker.phase(), CircuitPhase::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test]
async fn test_handshake_failure_is_retried() {
    let gateway = MockGateway::sequence(vec![
        MockReply::json(503, json!({"detail": "warming up"})),
        MockReply::stream(&CHUNKS),
    ])
    .await;
    let dispatcher = Dispatcher::new(test_config(&gateway)).unwrap();

    let handle = expect_stream(dispatcher.dispatch(stream_request(&dispatcher)).await.unwrap());
    let bytes = handle.collect_bytes().await.unwrap();

    assert_eq!(bytes, CHUNKS.concat().into_bytes());
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn test_collect_surfaces_truncation() {
    let gateway = MockGateway::always(MockReply::stream(&CHUNKS[..2]).truncated()).await;
    let dispatcher = Dispatcher::new(test_config(&gateway)).unwrap();

    let handle = expect_stream(dispatcher.dispatch(stream_request(&dispatcher)).await.unwrap());
    let err = handle.collect_bytes().await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::StreamTruncated);
    assert!(!err.offers_retry());
}
