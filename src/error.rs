//! Error types for queue-relay.
//!
//! Remote-call failures are not errors here: they travel as
//! [`crate::remote::DeliveryResult::Failure`] values. This enum covers the
//! queue, local I/O, malformed messages and startup configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("queue error: {0}")]
    Queue(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
