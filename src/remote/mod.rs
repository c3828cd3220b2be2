//! Outbound calls to the messaging API and the backend dispatcher.
//!
//! Every call yields a [`DeliveryResult`]; transport errors, non-2xx
//! statuses and unreadable bodies are all `Failure` values, never `Err`.
//! Adapters do not retry. Each request and its outcome is written to the
//! `api` log before the call returns.

pub mod dispatcher;
pub mod messaging;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::sink::EventLog;
use crate::telemetry::metrics;

pub use dispatcher::{DispatcherClient, DispatcherReply};
pub use messaging::{MessagingClient, TemplateMessage};

/// Component tag for adapter log records.
pub const API_COMPONENT: &str = "api";

/// Outcome of a single remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Success(Value),
    Failure(RemoteFailure),
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Success(_))
    }

    /// The decoded response body, if the call succeeded.
    pub fn body(&self) -> Option<&Value> {
        match self {
            DeliveryResult::Success(body) => Some(body),
            DeliveryResult::Failure(_) => None,
        }
    }
}

/// Why a remote call failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    /// HTTP status, when a response arrived at all.
    pub status: Option<u16>,
    /// Remote error payload if present, otherwise a description.
    pub detail: Value,
}

impl RemoteFailure {
    /// A failure with no HTTP response behind it.
    pub fn local(description: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: Value::String(description.into()),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.status {
            write!(f, "HTTP {code}: ")?;
        }
        match self.detail.as_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "{}", self.detail),
        }
    }
}

/// A remote operation endpoint.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    /// Perform `operation` with `payload`. Never fails with `Err`.
    async fn call(&self, operation: &str, payload: &Value) -> DeliveryResult;
}

/// Build the HTTP client shared by every adapter.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Turn a sent request into a `DeliveryResult`.
pub(crate) async fn settle(sent: reqwest::Result<reqwest::Response>) -> DeliveryResult {
    let response = match sent {
        Ok(response) => response,
        Err(e) => return DeliveryResult::Failure(RemoteFailure::local(e.to_string())),
    };

    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            return DeliveryResult::Failure(RemoteFailure {
                status: Some(status.as_u16()),
                detail: Value::String(format!("failed to read response body: {e}")),
            });
        }
    };

    if !status.is_success() {
        let detail = serde_json::from_str(&text).unwrap_or(Value::String(text));
        return DeliveryResult::Failure(RemoteFailure {
            status: Some(status.as_u16()),
            detail,
        });
    }

    match serde_json::from_str(&text) {
        Ok(body) => DeliveryResult::Success(body),
        Err(e) => DeliveryResult::Failure(RemoteFailure {
            status: Some(status.as_u16()),
            detail: Value::String(format!("malformed response body: {e}")),
        }),
    }
}

/// Log and meter the outcome of one call.
pub(crate) fn record_outcome(
    log: &EventLog,
    target: &'static str,
    operation: &str,
    result: &DeliveryResult,
    started: Instant,
) {
    let outcome = match result {
        DeliveryResult::Success(body) => {
            log.info(format!("RESPONSE ({operation}): {body}"));
            "success"
        }
        DeliveryResult::Failure(failure) => {
            log.error(format!("ERROR ({operation}): {failure}"));
            "failure"
        }
    };

    metrics::remote_calls().add(
        1,
        &[
            KeyValue::new("target", target),
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("outcome", outcome),
        ],
    );
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation.to_string())],
    );
}
