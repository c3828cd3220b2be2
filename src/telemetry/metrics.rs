//! Metric instrument factories for queue-relay.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"queue-relay"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for queue-relay instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("queue-relay")
}

/// Counter: queue-level operations (create, send, read, read_empty, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("relay.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: outbound remote calls.
/// Labels: `target` ("dispatcher" | "messaging"), `operation`, `outcome`.
pub fn remote_calls() -> Counter<u64> {
    meter()
        .u64_counter("relay.remote.calls")
        .with_description("Number of outbound remote calls")
        .build()
}

/// Counter: queue messages handled by workers.
/// Labels: `worker`, `outcome` ("acknowledged" | "retained").
pub fn messages_processed() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.processed")
        .with_description("Number of queue messages handled")
        .build()
}

/// Counter: dispatch-cycle detail updates.
/// Labels: `entity`, `outcome` ("updated" | "failed").
pub fn dispatch_updates() -> Counter<u64> {
    meter()
        .u64_counter("relay.dispatch.updates")
        .with_description("Number of detail updates applied by the dispatch cycle")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("relay.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
