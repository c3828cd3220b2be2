//! Templated-message delivery through the WhatsApp Cloud API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;

use super::{DeliveryResult, RemoteCall, RemoteFailure, record_outcome, settle};
use crate::config::MessagingConfig;
use crate::sink::EventLog;

/// Payload accepted by [`MessagingClient`]; the operation is the template name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMessage {
    pub to: String,
    pub language: String,
    /// Texts for the template's body placeholders, in order.
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl TemplateMessage {
    /// The Cloud API request body for this message.
    pub fn request_body(&self, template: &str) -> Value {
        let mut template_body = json!({
            "name": template,
            "language": { "code": self.language },
        });
        if !self.parameters.is_empty() {
            let parameters: Vec<Value> = self
                .parameters
                .iter()
                .map(|text| json!({ "type": "text", "text": text }))
                .collect();
            template_body["components"] = json!([{ "type": "body", "parameters": parameters }]);
        }
        json!({
            "messaging_product": "whatsapp",
            "to": self.to,
            "type": "template",
            "template": template_body,
        })
    }
}

/// Id of the sent message, from a Cloud API success body.
pub fn message_id(body: &Value) -> Option<&str> {
    body.pointer("/messages/0/id").and_then(Value::as_str)
}

pub struct MessagingClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
    log: EventLog,
}

impl MessagingClient {
    pub fn new(http: reqwest::Client, config: &MessagingConfig, log: EventLog) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/{}/messages",
                config.api_base.trim_end_matches('/'),
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
            log,
        }
    }
}

#[async_trait]
impl RemoteCall for MessagingClient {
    async fn call(&self, template: &str, payload: &Value) -> DeliveryResult {
        let started = Instant::now();
        let message: TemplateMessage = match serde_json::from_value(payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                self.log.info(format!("REQUEST: {template} - {payload}"));
                let result = DeliveryResult::Failure(RemoteFailure::local(format!(
                    "invalid template message: {e}"
                )));
                record_outcome(&self.log, "messaging", template, &result, started);
                return result;
            }
        };

        let body = message.request_body(template);
        self.log.info(format!("REQUEST: {template} - {body}"));

        let sent = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await;
        let result = settle(sent).await;

        if let DeliveryResult::Success(ref response) = result {
            self.log.info(format!(
                "message sent to {} with id: {}",
                message.to,
                message_id(response).unwrap_or("unknown")
            ));
        }
        record_outcome(&self.log, "messaging", template, &result, started);
        result
    }
}
