//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send,
//! pgmq.read_with_poll, pgmq.delete.

use crate::error::Result;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::time::Duration;

/// Interval pgmq waits between checks while long-polling.
const POLL_INTERVAL_MS: i32 = 100;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn record(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

fn whole_seconds(d: Duration) -> i32 {
    i32::try_from(d.as_secs()).unwrap_or(i32::MAX)
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        record(queue_name, "send");
        Ok(row.0)
    }

    /// Read at most one message, long-polling up to `wait`.
    /// The message stays invisible for `visibility_timeout` once read.
    /// Returns None if nothing arrived in time.
    pub async fn read_with_poll(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read_with_poll($1, $2, 1, $3, $4)",
        )
        .bind(queue_name)
        .bind(whole_seconds(visibility_timeout))
        .bind(whole_seconds(wait).max(1))
        .bind(POLL_INTERVAL_MS)
        .fetch_optional(&self.pool)
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });

        record(queue_name, if msg.is_some() { "read" } else { "read_empty" });
        Ok(msg)
    }

    /// Delete a message permanently. Returns false if it was already gone.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await?;
        record(queue_name, "delete");
        Ok(row.0)
    }
}
