//! Shared utilities for integration testing.
//!
//! A programmable raw-TCP mock gateway: one connection per request, every request
//! recorded, replies scripted per call index.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use llm_dispatch::config::{DispatchConfig, RetryConfig};

/// What the gateway saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub enum MockBody {
    Full(String),
    /// Chunked transfer. With `truncate` the connection closes before the final chunk.
    Chunked { chunks: Vec<String>, truncate: bool },
}

/// Scripted reply for one request.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: MockBody,
    pub delay: Duration,
}

impl MockReply {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: MockBody::Full(body.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self::text(status, body.to_string()).with_header("content-type", "application/json")
    }

    pub fn status(status: u16) -> Self {
        Self::text(status, "")
    }

    pub fn stream(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), "text/event-stream".into())],
            body: MockBody::Chunked {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                truncate: false,
            },
            delay: Duration::ZERO,
        }
    }

    /// Drop the connection after the scripted chunks.
    pub fn truncated(mut self) -> Self {
        if let MockBody::Chunked { truncate, .. } = &mut self.body {
            *truncate = true;
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Running mock gateway.
pub struct MockGateway {
    pub addr: SocketAddr,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockGateway {
    /// Start with a responder deciding the reply from the 0-based call index.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(u32, &RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder = Arc::new(responder);

        let (c, r) = (calls.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let (calls, requests, responder) = (c.clone(), r.clone(), responder.clone());
                tokio::spawn(async move {
                    let _ = serve(socket, calls, requests, responder).await;
                });
            }
        });

        Self {
            addr,
            calls,
            requests,
        }
    }

    /// Replies in order; the last one repeats.
    pub async fn sequence(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty());
        Self::start(move |i, _| {
            let idx = (i as usize).min(replies.len() - 1);
            replies[idx].clone()
        })
        .await
    }

    /// The same reply forever.
    pub async fn always(reply: MockReply) -> Self {
        Self::sequence(vec![reply]).await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve<F>(
    mut socket: TcpStream,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Arc<F>,
) -> std::io::Result<()>
where
    F: Fn(u32, &RecordedRequest) -> MockReply,
{
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };
    let index = calls.fetch_add(1, Ordering::SeqCst);
    requests.lock().unwrap().push(request.clone());
    let reply = (*responder)(index, &request);

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("connection: close\r\n");

    match reply.body {
        MockBody::Full(body) => {
            head.push_str(&format!("content-length: {}\r\n\r\n", body.len()));
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(body.as_bytes()).await?;
        }
        MockBody::Chunked { chunks, truncate } => {
            head.push_str("transfer-encoding: chunked\r\n\r\n");
            socket.write_all(head.as_bytes()).await?;
            socket.flush().await?;
            for chunk in chunks {
                socket
                    .write_all(format!("{:x}\r\n{}\r\n", chunk.len(), chunk).as_bytes())
                    .await?;
                socket.flush().await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if !truncate {
                socket.write_all(b"0\r\n\r\n").await?;
            }
        }
    }

    socket.flush().await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<RecordedRequest>> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&tmp[..n]);
    }

    Ok(Some(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Config pointing at `gateway` with fast, deterministic retries.
pub fn test_config(gateway: &MockGateway) -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.gateway.base_url = gateway.url();
    config.retries = RetryConfig {
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
        jitter_ms: 0,
    };
    config.circuit_breaker.threshold = 50;
    config
}
