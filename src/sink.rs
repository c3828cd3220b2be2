//! Append-only operational log.
//!
//! Every component writes [`LogRecord`]s through an [`EventLog`]. The file
//! sink writes one JSON object per line; the log viewer tails that file.
//! Each record is also mirrored to `tracing` so it reaches the console and
//! any OTLP exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// One operational event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub message: String,
}

/// Severity used when mirroring a record to `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Destination for log records. Appends from concurrent tasks must not
/// interleave within a record.
pub trait LogSink: Send + Sync {
    fn append(&self, record: &LogRecord);
}

/// Appends newline-delimited JSON records to a file.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) the log file in append mode, creating parent dirs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn append(&self, record: &LogRecord) {
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize log record");
                return;
            }
        };
        line.push('\n');

        // A poisoned lock only means another writer panicked mid-call; the
        // file handle itself is still usable.
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append log record");
        }
    }
}

/// Keeps records in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, in insertion order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Messages appended under the given component.
    pub fn messages_for(&self, component: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.component == component)
            .map(|r| r.message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn append(&self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record.clone());
    }
}

/// A component-tagged handle on a shared sink.
#[derive(Clone)]
pub struct EventLog {
    component: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl EventLog {
    pub fn new(component: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            component: Arc::from(component),
            sink,
        }
    }

    /// Same sink, different component tag.
    pub fn for_component(&self, component: &str) -> Self {
        Self::new(component, Arc::clone(&self.sink))
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn info(&self, message: impl Into<String>) {
        self.write(Level::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.write(Level::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.write(Level::Error, message.into());
    }

    fn write(&self, level: Level, message: String) {
        let component = &*self.component;
        match level {
            Level::Info => tracing::info!(component, "{message}"),
            Level::Warn => tracing::warn!(component, "{message}"),
            Level::Error => tracing::error!(component, "{message}"),
        }
        self.sink.append(&LogRecord {
            timestamp: Utc::now(),
            component: component.to_string(),
            message,
        });
    }
}
