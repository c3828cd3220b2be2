//! # queue-relay
//!
//! Relays queued notifications to a templated-messaging API and drives a
//! polling dispatch loop against a backend dispatcher.
//!
//! Queues are pgmq on Postgres; remote calls go over HTTP via reqwest;
//! every component writes to an append-only operational log and emits
//! tracing/OpenTelemetry signals.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod remote;
pub mod sink;
pub mod telemetry;
pub mod worker;
