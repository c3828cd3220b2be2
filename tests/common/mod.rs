//! Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use queue_relay::error::Result;
use queue_relay::queue::{MemoryQueue, Queue, QueueMessage, ReceiptHandle, ReceiveOptions};
use queue_relay::remote::{DeliveryResult, RemoteCall, RemoteFailure};
use queue_relay::sink::{EventLog, MemorySink};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// An event log backed by memory, plus the sink to inspect it.
pub fn memory_log(component: &str) -> (EventLog, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (EventLog::new(component, sink.clone()), sink)
}

/// Receive options that never block a test.
pub fn instant_options() -> ReceiveOptions {
    ReceiveOptions {
        wait: Duration::ZERO,
        visibility_timeout: Duration::ZERO,
    }
}

pub fn success(body: Value) -> DeliveryResult {
    DeliveryResult::Success(body)
}

pub fn network_error() -> DeliveryResult {
    DeliveryResult::Failure(RemoteFailure::local("error sending request: connection refused"))
}

type Responder = Box<dyn Fn(&str, &Value) -> DeliveryResult + Send + Sync>;

/// A remote endpoint that answers from a closure and records every call.
pub struct ScriptedRemote {
    responder: Responder,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedRemote {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> DeliveryResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always(result: DeliveryResult) -> Arc<Self> {
        Self::new(move |_, _| result.clone())
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls().into_iter().map(|(op, _)| op).collect()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl RemoteCall for ScriptedRemote {
    async fn call(&self, operation: &str, payload: &Value) -> DeliveryResult {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), payload.clone()));
        (self.responder)(operation, payload)
    }
}

/// A memory queue that records every delete.
pub struct CountingQueue {
    pub inner: MemoryQueue,
    deletes: Mutex<Vec<ReceiptHandle>>,
}

impl CountingQueue {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryQueue::new(name),
            deletes: Mutex::new(Vec::new()),
        })
    }

    pub fn deletes(&self) -> Vec<ReceiptHandle> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Queue for CountingQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Option<QueueMessage>> {
        self.inner.receive(options).await
    }

    async fn delete(&self, handle: ReceiptHandle) -> Result<()> {
        self.deletes.lock().unwrap().push(handle);
        self.inner.delete(handle).await
    }
}

/// Serve exactly one HTTP response; the join handle yields the raw request.
pub async fn stub_http(status: u16, body: &str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });

    (format!("http://{addr}"), handle)
}

/// A URL nothing is listening on.
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
