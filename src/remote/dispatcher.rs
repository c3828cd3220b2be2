//! Backend dispatcher client.
//!
//! The dispatcher multiplexes every operation behind one URL: the request
//! is `{method, data}` and the reply is `{success, data | response}`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Instant;

use super::{DeliveryResult, RemoteCall, record_outcome, settle};
use crate::sink::EventLog;

pub struct DispatcherClient {
    http: reqwest::Client,
    url: String,
    log: EventLog,
}

impl DispatcherClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, log: EventLog) -> Self {
        Self {
            http,
            url: url.into(),
            log,
        }
    }
}

#[async_trait]
impl RemoteCall for DispatcherClient {
    async fn call(&self, operation: &str, payload: &Value) -> DeliveryResult {
        let request = json!({ "method": operation, "data": payload });
        self.log.info(format!("REQUEST: {operation} - {request}"));

        let started = Instant::now();
        let result = settle(self.http.post(&self.url).json(&request).send().await).await;
        record_outcome(&self.log, "dispatcher", operation, &result, started);
        result
    }
}

/// A dispatcher reply body, interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherReply {
    pub success: bool,
    /// `data`, falling back to `response`; `Null` when neither is present.
    pub data: Value,
}

impl DispatcherReply {
    pub fn parse(body: &Value) -> Self {
        let success = body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let data = body
            .get("data")
            .filter(|v| !v.is_null())
            .or_else(|| body.get("response"))
            .cloned()
            .unwrap_or(Value::Null);
        Self { success, data }
    }

    /// The reply of a successful call that also reports `success: true`.
    pub fn accepted(result: &DeliveryResult) -> Option<Self> {
        result
            .body()
            .map(Self::parse)
            .filter(|reply| reply.success)
    }

    /// `data` as a list; anything that is not an array is empty.
    pub fn items(&self) -> &[Value] {
        self.data.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}
