//! Queue consumer worker: poll, deliver, acknowledge only on success.
//!
//! A worker drains one queue according to its [`WorkerProfile`]. A message
//! is deleted only after the messaging API confirms delivery; on any
//! failure it is left alone and the queue's visibility timeout brings it
//! back. Nothing that happens to one message stops the loop.

use opentelemetry::KeyValue;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{TemplateParameter, WorkerProfile};
use crate::error::{Error, Result};
use crate::queue::payload::field_text;
use crate::queue::{Queue, QueueMessage, ReceiptHandle, ReceiveOptions, decode_payload};
use crate::remote::{DeliveryResult, RemoteCall, TemplateMessage};
use crate::sink::EventLog;
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_message_outcome, start_message_span};

/// Pause after a failed receive so an unreachable queue is not hammered.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived within the wait.
    Empty,
    /// Delivered and deleted.
    Acknowledged(ReceiptHandle),
    /// Left on the queue for redelivery.
    Retained { handle: ReceiptHandle, reason: String },
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Empty => "empty",
            PollOutcome::Acknowledged(_) => "acknowledged",
            PollOutcome::Retained { .. } => "retained",
        }
    }
}

/// Build the templated message a profile asks for from a decoded payload.
pub fn render_message(profile: &WorkerProfile, payload: &Map<String, Value>) -> Result<TemplateMessage> {
    let to = field_text(payload, &profile.contact_field).ok_or_else(|| {
        Error::MalformedPayload(format!("missing contact field {}", profile.contact_field))
    })?;

    let parameters = profile
        .parameters
        .iter()
        .map(|parameter| match parameter {
            TemplateParameter::Field { field } => field_text(payload, field).ok_or_else(|| {
                Error::MalformedPayload(format!("missing template field {field}"))
            }),
            TemplateParameter::Literal { text } => Ok(text.clone()),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TemplateMessage {
        to,
        language: profile.language.clone(),
        parameters,
    })
}

pub struct QueueWorker {
    profile: WorkerProfile,
    queue: Arc<dyn Queue>,
    messaging: Arc<dyn RemoteCall>,
    /// Records successful deliveries when the profile names a `log_method`.
    dispatcher: Option<Arc<dyn RemoteCall>>,
    options: ReceiveOptions,
    log: EventLog,
}

impl QueueWorker {
    /// `log` is re-tagged with the profile name.
    pub fn new(
        profile: WorkerProfile,
        queue: Arc<dyn Queue>,
        messaging: Arc<dyn RemoteCall>,
        options: ReceiveOptions,
        log: &EventLog,
    ) -> Self {
        let log = log.for_component(&profile.name);
        Self {
            profile,
            queue,
            messaging,
            dispatcher: None,
            options,
            log,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RemoteCall>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Poll until `shutdown` fires. A message already received is always
    /// settled before the loop checks the token again.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.log
            .info(format!("worker started on queue {}", self.queue.name()));

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.options) => received,
            };

            match received {
                Ok(Some(msg)) => {
                    self.handle(msg).await;
                }
                Ok(None) => self.log.info("no message in queue, waiting..."),
                Err(e) => {
                    self.log.error(format!("queue receive failed: {e}"));
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        self.log.info("worker stopped");
    }

    /// A single receive-and-settle iteration.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        match self.queue.receive(self.options).await? {
            Some(msg) => Ok(self.handle(msg).await),
            None => {
                self.log.info("no message in queue, waiting...");
                Ok(PollOutcome::Empty)
            }
        }
    }

    async fn handle(&self, msg: QueueMessage) -> PollOutcome {
        let span = start_message_span(
            &self.profile.name,
            self.queue.name(),
            msg.handle.0,
            msg.read_count,
        );
        let outcome = self.deliver(&msg).instrument(span.clone()).await;

        record_message_outcome(&span, outcome.label());
        metrics::messages_processed().add(
            1,
            &[
                KeyValue::new("worker", self.profile.name.clone()),
                KeyValue::new("outcome", outcome.label()),
            ],
        );
        outcome
    }

    async fn deliver(&self, msg: &QueueMessage) -> PollOutcome {
        let payload = match decode_payload(&msg.body) {
            Ok(payload) => payload,
            Err(e) => return self.retain(msg.handle, e.to_string()),
        };

        match field_text(&payload, &self.profile.contact_field) {
            Some(contact) => self.log.info(format!("processing message for {contact}")),
            None => self.log.info(format!("processing message {}", msg.handle)),
        }

        let (contact, request) = match render_message(&self.profile, &payload).and_then(|message| {
            let contact = message.to.clone();
            Ok((contact, serde_json::to_value(message)?))
        }) {
            Ok(rendered) => rendered,
            Err(e) => return self.retain(msg.handle, e.to_string()),
        };

        let response = match self.messaging.call(&self.profile.template, &request).await {
            DeliveryResult::Success(response) => {
                self.log.info(format!("message sent to {contact}"));
                response
            }
            DeliveryResult::Failure(failure) => {
                self.log
                    .warn(format!("delivery failed, message NOT deleted: {failure}"));
                return PollOutcome::Retained {
                    handle: msg.handle,
                    reason: failure.to_string(),
                };
            }
        };

        if let Err(e) = self.queue.delete(msg.handle).await {
            self.log.error(format!(
                "delivered but could not delete message {}: {e}",
                msg.handle
            ));
            return PollOutcome::Retained {
                handle: msg.handle,
                reason: e.to_string(),
            };
        }
        self.log.info("message deleted from queue");

        self.record_delivery(&payload, &response).await;
        PollOutcome::Acknowledged(msg.handle)
    }

    fn retain(&self, handle: ReceiptHandle, reason: String) -> PollOutcome {
        self.log
            .error(format!("cannot process message {handle}: {reason}"));
        PollOutcome::Retained { handle, reason }
    }

    /// Best effort: the message is already acknowledged.
    async fn record_delivery(&self, payload: &Map<String, Value>, response: &Value) {
        let (Some(method), Some(dispatcher)) = (&self.profile.log_method, &self.dispatcher) else {
            return;
        };
        let record = json!({ "mensagem": payload, "retorno": response });
        if let DeliveryResult::Failure(failure) = dispatcher.call(method, &record).await {
            self.log
                .warn(format!("could not record delivery via {method}: {failure}"));
        }
    }
}
