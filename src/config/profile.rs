//! Worker profiles and their registry.
//!
//! A profile says which queue a worker drains and how each message becomes
//! a templated message. Profiles live in TOML files, one worker per file.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    worker: WorkerProfile,
}

/// How one queue worker turns payloads into templated messages.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerProfile {
    /// Component tag used in log records.
    pub name: String,
    /// Queue this worker drains.
    pub queue: String,
    /// Payload field holding the destination contact.
    pub contact_field: String,
    pub template: String,
    pub language: String,
    /// Ordered template placeholders.
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
    /// Dispatcher method that records a successful delivery, if any.
    #[serde(default)]
    pub log_method: Option<String>,
}

/// A template placeholder: either copied from a payload field or fixed text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TemplateParameter {
    Field { field: String },
    Literal { text: String },
}

impl WorkerProfile {
    /// Parse a single profile from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ProfileFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad worker profile: {e}")))?;
        file.worker.validate()?;
        Ok(file.worker)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("name", &self.name),
            ("queue", &self.queue),
            ("contact_field", &self.contact_field),
            ("template", &self.template),
            ("language", &self.language),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("worker profile field {key} is empty")));
            }
        }
        Ok(())
    }
}

/// Registry of loaded profiles, indexed by worker name.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, WorkerProfile>,
}

impl ProfileRegistry {
    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read profile dir {}: {e}", dir.display()))
        })?;

        let mut registry = Self::default();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let profile = WorkerProfile::from_toml(&content).map_err(|e| {
                    Error::Config(format!("{}: {e}", path.display()))
                })?;
                registry.insert(profile)?;
            }
        }

        if registry.profiles.is_empty() {
            return Err(Error::Config(format!(
                "no worker profiles found in {}",
                dir.display()
            )));
        }
        Ok(registry)
    }

    /// Add a profile. Worker names must be unique.
    pub fn insert(&mut self, profile: WorkerProfile) -> Result<()> {
        if self.profiles.contains_key(&profile.name) {
            return Err(Error::Config(format!(
                "duplicate worker profile: {}",
                profile.name
            )));
        }
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkerProfile> {
        self.profiles.get(name)
    }

    /// Profiles in name order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
