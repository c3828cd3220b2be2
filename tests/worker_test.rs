//! Integration tests for the queue consumer worker.

mod common;

use common::{CountingQueue, ScriptedRemote, instant_options, memory_log, network_error, success};
use queue_relay::config::{TemplateParameter, WorkerProfile};
use queue_relay::queue::{MemoryQueue, Queue, ReceiveOptions, decode_payload};
use queue_relay::remote::DeliveryResult;
use queue_relay::worker::{PollOutcome, QueueWorker, render_message};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn delivery_profile() -> WorkerProfile {
    WorkerProfile {
        name: "workerWhatsapp".to_string(),
        queue: "delivery".to_string(),
        contact_field: "telefone".to_string(),
        template: "pedido_entregue".to_string(),
        language: "pt_BR".to_string(),
        parameters: vec![
            TemplateParameter::Field {
                field: "nome_cliente".to_string(),
            },
            TemplateParameter::Field {
                field: "cod".to_string(),
            },
        ],
        log_method: None,
    }
}

fn nps_profile() -> WorkerProfile {
    WorkerProfile {
        name: "workerNps".to_string(),
        queue: "nps".to_string(),
        contact_field: "telefone".to_string(),
        template: "nps_clientes_deck".to_string(),
        language: "pt_BR".to_string(),
        parameters: vec![
            TemplateParameter::Field {
                field: "identificador_conta".to_string(),
            },
            TemplateParameter::Literal {
                text: "Deck".to_string(),
            },
            TemplateParameter::Field {
                field: "link_nps".to_string(),
            },
        ],
        log_method: Some("salvarLogNps".to_string()),
    }
}

fn delivered() -> DeliveryResult {
    success(json!({"messages": [{"id": "wamid.X"}]}))
}

fn order_message() -> Value {
    json!({"telefone": "5511999999999", "nome_cliente": "Ana", "cod": 1234})
}

// ---------------------------------------------------------------------------
// Acknowledgment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_delivery_deletes_message_once() {
    let queue = CountingQueue::new("delivery");
    let handle = queue.inner.send(order_message());

    // The queue must not have been touched when the adapter answers.
    let observed = Arc::clone(&queue);
    let messaging = ScriptedRemote::new(move |_, _| {
        assert!(observed.deletes().is_empty(), "deleted before delivery succeeded");
        delivered()
    });
    let (log, sink) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging.clone(),
        instant_options(),
        &log,
    );

    let outcome = worker.poll_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::Acknowledged(handle));
    assert_eq!(queue.deletes(), vec![handle]);
    assert!(queue.inner.is_empty());

    let calls = messaging.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "pedido_entregue");
    assert_eq!(
        calls[0].1,
        json!({"to": "5511999999999", "language": "pt_BR", "parameters": ["Ana", "1234"]})
    );

    // Receipt, success and acknowledgment, in that order, under the worker's tag.
    let messages = sink.messages_for("workerWhatsapp");
    let position = |text: &str| {
        messages
            .iter()
            .position(|m| m == text)
            .unwrap_or_else(|| panic!("missing log record {text:?} in {messages:?}"))
    };
    let received = position("processing message for 5511999999999");
    let sent = position("message sent to 5511999999999");
    let deleted = position("message deleted from queue");
    assert!(received < sent && sent < deleted);

    // Nothing left: the next poll is empty and nothing is deleted again.
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Empty);
    assert_eq!(queue.deletes().len(), 1);
}

#[tokio::test]
async fn failed_delivery_leaves_message_for_redelivery() {
    let queue = CountingQueue::new("delivery");
    let handle = queue.inner.send(order_message());
    let messaging = ScriptedRemote::always(network_error());
    let (log, sink) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging.clone(),
        instant_options(),
        &log,
    );

    let outcome = worker.poll_once().await.unwrap();
    assert!(matches!(outcome, PollOutcome::Retained { handle: h, .. } if h == handle));
    assert!(queue.deletes().is_empty());
    assert!(
        sink.messages_for("workerWhatsapp")
            .iter()
            .any(|m| m.starts_with("delivery failed, message NOT deleted"))
    );

    // With a zero visibility timeout the same message is consumable again.
    let again = queue.receive(instant_options()).await.unwrap().unwrap();
    assert_eq!(again.handle, handle);
    assert_eq!(again.read_count, 2);
}

#[tokio::test]
async fn redelivered_message_is_acknowledged_once_delivery_recovers() {
    let queue = CountingQueue::new("delivery");
    let handle = queue.inner.send(order_message());

    let attempts = std::sync::atomic::AtomicUsize::new(0);
    let messaging = ScriptedRemote::new(move |_, _| {
        if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            network_error()
        } else {
            delivered()
        }
    });
    let (log, _) = memory_log("relay");
    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging.clone(),
        instant_options(),
        &log,
    );

    assert!(matches!(worker.poll_once().await.unwrap(), PollOutcome::Retained { .. }));
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Acknowledged(handle));
    assert_eq!(queue.deletes(), vec![handle]);
    assert_eq!(messaging.calls().len(), 2);
}

// ---------------------------------------------------------------------------
// Payload handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_encoded_body_is_delivered_like_a_plain_one() {
    let queue = CountingQueue::new("delivery");
    queue.inner.send(Value::String(order_message().to_string()));
    queue.inner.send(order_message());
    let messaging = ScriptedRemote::always(delivered());
    let (log, _) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging.clone(),
        instant_options(),
        &log,
    );
    worker.poll_once().await.unwrap();
    worker.poll_once().await.unwrap();

    let calls = messaging.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, calls[1].1);
    assert_eq!(queue.deletes().len(), 2);
}

#[tokio::test]
async fn missing_template_field_is_retained_without_calling_the_api() {
    let queue = CountingQueue::new("delivery");
    let handle = queue
        .inner
        .send(json!({"telefone": "5511999999999", "cod": 1}));
    let messaging = ScriptedRemote::always(delivered());
    let (log, sink) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging.clone(),
        instant_options(),
        &log,
    );

    match worker.poll_once().await.unwrap() {
        PollOutcome::Retained { handle: h, reason } => {
            assert_eq!(h, handle);
            assert!(reason.contains("nome_cliente"), "reason: {reason}");
        }
        other => panic!("expected Retained, got {other:?}"),
    }
    assert!(messaging.calls().is_empty());
    assert!(queue.deletes().is_empty());
    assert!(
        sink.messages_for("workerWhatsapp")
            .iter()
            .any(|m| m.starts_with(&format!("cannot process message {handle}")))
    );
}

#[tokio::test]
async fn non_object_body_does_not_stop_the_worker() {
    let queue = CountingQueue::new("delivery");
    queue.inner.send(json!([1, 2, 3]));
    let good = queue.inner.send(order_message());
    let messaging = ScriptedRemote::always(delivered());
    let (log, _) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        messaging,
        ReceiveOptions {
            wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(60),
        },
        &log,
    );

    assert!(matches!(worker.poll_once().await.unwrap(), PollOutcome::Retained { .. }));
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Acknowledged(good));
}

#[test]
fn render_message_keeps_parameter_order_and_literals() {
    let payload = decode_payload(&json!({
        "telefone": 5583999275543u64,
        "identificador_conta": "ACME",
        "link_nps": "https://example.com/nps/1",
    }))
    .unwrap();

    let message = render_message(&nps_profile(), &payload).unwrap();
    assert_eq!(message.to, "5583999275543");
    assert_eq!(
        message.parameters,
        vec!["ACME", "Deck", "https://example.com/nps/1"]
    );
}

#[test]
fn render_message_requires_the_contact_field() {
    let payload = decode_payload(&json!({"identificador_conta": "ACME", "link_nps": "x"})).unwrap();
    assert!(render_message(&nps_profile(), &payload).is_err());
}

// ---------------------------------------------------------------------------
// Delivery log on the dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivery_is_recorded_on_the_dispatcher() {
    let queue = CountingQueue::new("nps");
    queue.inner.send(json!({
        "telefone": "5511999999999",
        "identificador_conta": "ACME",
        "link_nps": "https://example.com/nps/1",
    }));
    let messaging = ScriptedRemote::always(delivered());
    let dispatcher = ScriptedRemote::always(success(json!({"success": true})));
    let (log, _) = memory_log("relay");

    let worker = QueueWorker::new(
        nps_profile(),
        queue.clone(),
        messaging,
        instant_options(),
        &log,
    )
    .with_dispatcher(dispatcher.clone());

    assert!(matches!(worker.poll_once().await.unwrap(), PollOutcome::Acknowledged(_)));

    let records = dispatcher.calls_to("salvarLogNps");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["mensagem"]["identificador_conta"], "ACME");
    assert_eq!(records[0]["retorno"]["messages"][0]["id"], "wamid.X");
}

#[tokio::test]
async fn failed_delivery_record_does_not_undo_acknowledgment() {
    let queue = CountingQueue::new("nps");
    let handle = queue.inner.send(json!({
        "telefone": "5511999999999",
        "identificador_conta": "ACME",
        "link_nps": "x",
    }));
    let dispatcher = ScriptedRemote::always(network_error());
    let (log, sink) = memory_log("relay");

    let worker = QueueWorker::new(
        nps_profile(),
        queue.clone(),
        ScriptedRemote::always(delivered()),
        instant_options(),
        &log,
    )
    .with_dispatcher(dispatcher.clone());

    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Acknowledged(handle));
    assert_eq!(queue.deletes(), vec![handle]);
    assert_eq!(dispatcher.calls().len(), 1);
    assert!(
        sink.messages_for("workerNps")
            .iter()
            .any(|m| m.starts_with("could not record delivery via salvarLogNps"))
    );
}

#[tokio::test]
async fn profile_without_log_method_never_calls_the_dispatcher() {
    let queue = CountingQueue::new("delivery");
    queue.inner.send(order_message());
    let dispatcher = ScriptedRemote::always(success(json!({"success": true})));
    let (log, _) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        ScriptedRemote::always(delivered()),
        instant_options(),
        &log,
    )
    .with_dispatcher(dispatcher.clone());

    worker.poll_once().await.unwrap();
    assert!(dispatcher.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_poll_returns_promptly_without_error() {
    let queue = Arc::new(MemoryQueue::new("delivery"));
    let (log, sink) = memory_log("relay");
    let worker = QueueWorker::new(
        delivery_profile(),
        queue,
        ScriptedRemote::always(delivered()),
        ReceiveOptions {
            wait: Duration::from_millis(50),
            visibility_timeout: Duration::from_secs(300),
        },
        &log,
    );

    let outcome = tokio::time::timeout(Duration::from_secs(2), worker.poll_once())
        .await
        .expect("empty poll should return after the queue wait")
        .unwrap();
    assert_eq!(outcome, PollOutcome::Empty);
    assert_eq!(
        sink.messages_for("workerWhatsapp"),
        vec!["no message in queue, waiting...".to_string()]
    );
}

#[tokio::test]
async fn run_drains_the_queue_and_stops_on_cancel() {
    let queue = CountingQueue::new("delivery");
    queue.inner.send(order_message());
    queue.inner.send(order_message());
    let (log, sink) = memory_log("relay");

    let worker = QueueWorker::new(
        delivery_profile(),
        queue.clone(),
        ScriptedRemote::always(delivered()),
        ReceiveOptions {
            wait: Duration::from_millis(20),
            visibility_timeout: Duration::from_secs(300),
        },
        &log,
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move { worker.run(token).await });

    let drained = async {
        while !queue.inner.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drained)
        .await
        .expect("worker should drain the queue");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("worker should stop after cancel")
        .unwrap();

    assert_eq!(queue.deletes().len(), 2);
    let messages = sink.messages_for("workerWhatsapp");
    assert_eq!(messages.first().map(String::as_str), Some("worker started on queue delivery"));
    assert_eq!(messages.last().map(String::as_str), Some("worker stopped"));
}
