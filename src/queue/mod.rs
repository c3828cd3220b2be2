//! The queue seam: receive one message with a visibility timeout, delete it
//! once handled.
//!
//! Redelivery is owned entirely by the queue. A message that is never
//! deleted reappears after its visibility timeout; how often that may
//! happen is the queue's own policy.

pub mod memory;
pub mod payload;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Db;
use crate::error::Result;

pub use memory::MemoryQueue;
pub use payload::decode_payload;

/// Acknowledgment handle of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub i64);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as handed to a worker.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub handle: ReceiptHandle,
    /// Times the message has been received, including this one.
    pub read_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Raw body. May be double-encoded; see [`decode_payload`].
    pub body: serde_json::Value,
}

/// Receive settings used on every poll.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    pub wait: Duration,
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// A named queue a worker can drain.
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    /// Receive at most one message, waiting up to `options.wait`.
    async fn receive(&self, options: ReceiveOptions) -> Result<Option<QueueMessage>>;

    /// Acknowledge a message. Deleting an unknown handle is a no-op.
    async fn delete(&self, handle: ReceiptHandle) -> Result<()>;
}

/// A pgmq queue on the shared pool.
pub struct PgmqQueue {
    db: Arc<Db>,
    name: String,
}

impl PgmqQueue {
    pub fn new(db: Arc<Db>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Queue for PgmqQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Option<QueueMessage>> {
        let msg = self
            .db
            .read_with_poll(&self.name, options.visibility_timeout, options.wait)
            .await?;
        Ok(msg.map(|m| QueueMessage {
            handle: ReceiptHandle(m.msg_id),
            read_count: u32::try_from(m.read_ct).unwrap_or(0),
            enqueued_at: m.enqueued_at,
            body: m.message,
        }))
    }

    async fn delete(&self, handle: ReceiptHandle) -> Result<()> {
        if !self.db.delete_message(&self.name, handle.0).await? {
            tracing::debug!(queue = %self.name, %handle, "delete of unknown message ignored");
        }
        Ok(())
    }
}
