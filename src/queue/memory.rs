//! In-process queue with pgmq's visibility-timeout semantics.
//!
//! Used by the test suite and for running the workers without Postgres.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{Queue, QueueMessage, ReceiptHandle, ReceiveOptions};
use crate::error::Result;

const POLL_STEP: Duration = Duration::from_millis(20);

struct Entry {
    id: i64,
    body: Value,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    visible_at: Instant,
    read_ct: u32,
}

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<Entry>,
}

pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Enqueue a body, visible immediately.
    pub fn send(&self, body: Value) -> ReceiptHandle {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(Entry {
            id,
            body,
            enqueued_at: chrono::Utc::now(),
            visible_at: Instant::now(),
            read_ct: 0,
        });
        ReceiptHandle(id)
    }

    /// Messages not yet deleted, visible or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: ReceiptHandle) -> bool {
        self.lock().entries.iter().any(|e| e.id == handle.0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn try_receive(&self, visibility_timeout: Duration) -> Option<QueueMessage> {
        let now = Instant::now();
        let mut state = self.lock();
        let entry = state.entries.iter_mut().find(|e| e.visible_at <= now)?;
        entry.visible_at = now + visibility_timeout;
        entry.read_ct += 1;
        Some(QueueMessage {
            handle: ReceiptHandle(entry.id),
            read_count: entry.read_ct,
            enqueued_at: entry.enqueued_at,
            body: entry.body.clone(),
        })
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Option<QueueMessage>> {
        let deadline = Instant::now() + options.wait;
        loop {
            if let Some(msg) = self.try_receive(options.visibility_timeout) {
                return Ok(Some(msg));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(POLL_STEP)).await;
        }
    }

    async fn delete(&self, handle: ReceiptHandle) -> Result<()> {
        self.lock().entries.retain(|e| e.id != handle.0);
        Ok(())
    }
}
