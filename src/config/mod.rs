//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod profile;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use profile::{ProfileRegistry, TemplateParameter, WorkerProfile};

pub const DEFAULT_MESSAGING_API_BASE: &str = "https://graph.facebook.com/v22.0";
pub const DEFAULT_ENTITIES: &[&str] = &["42557", "42458", "41815"];

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub dispatcher_url: String,
    pub messaging: MessagingConfig,
    /// Entities swept by every dispatch cycle, in order.
    pub entities: Vec<String>,
    pub dispatch_interval: Duration,
    /// Long-poll wait for a single queue receive.
    pub queue_wait: Duration,
    /// How long a received message stays invisible before redelivery.
    pub visibility_timeout: Duration,
    pub http_timeout: Duration,
    pub log_file: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

#[derive(Debug)]
pub struct MessagingConfig {
    pub api_base: String,
    pub phone_number_id: String,
    pub access_token: SecretString,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
                Error::Config(format!("required environment variable {name} is not set"))
            })
        };

        let entities = match lookup("DISPATCH_ENTITIES") {
            Some(raw) => parse_entities(&raw)?,
            None => DEFAULT_ENTITIES.iter().map(|e| e.to_string()).collect(),
        };

        Ok(Self {
            database_url: SecretString::from(required("DATABASE_URL")?),
            dispatcher_url: required("DISPATCHER_URL")?,
            messaging: MessagingConfig {
                api_base: lookup("MESSAGING_API_BASE")
                    .unwrap_or_else(|| DEFAULT_MESSAGING_API_BASE.to_string()),
                phone_number_id: required("WHATSAPP_PHONE_NUMBER_ID")?,
                access_token: SecretString::from(required("WHATSAPP_ACCESS_TOKEN")?),
            },
            entities,
            dispatch_interval: Duration::from_secs(parsed_or(&lookup, "DISPATCH_INTERVAL_SECS", 60)?),
            queue_wait: Duration::from_secs(parsed_or(&lookup, "QUEUE_WAIT_SECS", 10)?),
            visibility_timeout: Duration::from_secs(parsed_or(
                &lookup,
                "VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
            http_timeout: Duration::from_secs(parsed_or(&lookup, "HTTP_TIMEOUT_SECS", 30)?),
            log_file: lookup("RELAY_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs/api.log")),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parsed_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}

/// Parse a comma-separated entity list, keeping the given order.
pub fn parse_entities(raw: &str) -> Result<Vec<String>> {
    let entities: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();
    if entities.is_empty() {
        return Err(Error::Config("DISPATCH_ENTITIES is empty".to_string()));
    }
    Ok(entities)
}
