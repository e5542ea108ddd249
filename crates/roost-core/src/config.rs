//! Configuration for the coordination server.
//!
//! Loaded from a TOML file (conventionally `.roost/config.toml`); every
//! field has a default so an empty file or no file at all is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{CoordError, Result};

/// Server-level coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordConfig {
    /// Path to the embedded database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// How many times a transaction is retried on lock contention before
    /// surfacing Busy to the caller.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    /// Backoff between busy retries, in milliseconds.
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,

    /// Maximum length of a single task note, in bytes.
    #[serde(default = "default_max_note_len")]
    pub max_note_len: usize,

    /// Fixed admin token. When unset a fresh token is generated per process;
    /// setting it is mainly useful for tests and restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

impl Default for CoordConfig {
    fn default() -> Self {
        CoordConfig {
            database_path: default_database_path(),
            busy_retries: default_busy_retries(),
            busy_backoff_ms: default_busy_backoff_ms(),
            max_note_len: default_max_note_len(),
            admin_token: None,
        }
    }
}

impl CoordConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&data).map_err(|e| CoordError::Config(e.to_string()))
    }

    /// Load configuration, falling back to defaults if the file is missing.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

// Default value providers
fn default_database_path() -> String {
    ".roost/roost.db".to_string()
}

fn default_busy_retries() -> u32 {
    3
}

fn default_busy_backoff_ms() -> u64 {
    25
}

fn default_max_note_len() -> usize {
    16 * 1024
}
