//! Span helpers for message handling and dispatch cycles.

use tracing::Span;
use uuid::Uuid;

/// Start a span for handling one queue message.
///
/// The `message.outcome` field is declared empty and filled by
/// [`record_message_outcome`].
pub fn start_message_span(worker: &str, queue: &str, msg_id: i64, read_count: u32) -> Span {
    tracing::info_span!(
        "relay.message",
        "relay.worker" = worker,
        "queue.name" = queue,
        "message.id" = msg_id,
        "message.read_count" = read_count,
        "message.outcome" = tracing::field::Empty,
    )
}

/// Record how a message was settled on its span.
pub fn record_message_outcome(span: &Span, outcome: &str) {
    span.record("message.outcome", outcome);
}

/// Start a span for one dispatch cycle, identified by a fresh id.
pub fn start_cycle_span(cycle_id: &Uuid) -> Span {
    tracing::info_span!(
        "relay.dispatch.cycle",
        "cycle.id" = %cycle_id,
        "cycle.entities" = tracing::field::Empty,
    )
}

/// Record how many entities the cycle swept.
pub fn record_cycle_entities(span: &Span, count: usize) {
    span.record("cycle.entities", count as u64);
}
