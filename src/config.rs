//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`MembraneConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use membrane::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml".as_ref()).unwrap();
//! println!("{:?}", config);
//! ```

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use tracing::*;

use crate::error::ConfigError;
use crate::index::IndexKind;

/// Environment variable that overrides `api_key` from the YAML file.
pub const API_KEY_ENV: &str = "MEMBRANE_API_KEY";

/// Represents the application's configuration.
///
/// Only the connection fields are required in YAML; the `chat` and `ghost`
/// sections fall back to [`ChatSettings::default`] and [`GhostSettings::default`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MembraneConfig {
    /// The API key used to authenticate requests to the completion API.
    pub api_key: String,

    /// The base URL of an OpenAI-compatible API.
    pub api_base: String,

    /// Default generation model identifier.
    pub model: String,

    /// SQLite database holding memory records and chat transcripts.
    pub database_url: String,

    /// Owner half of every collection key created from the CLI.
    #[serde(default = "default_owner")]
    pub owner_id: String,

    /// Vector index used for new collections.
    #[serde(default)]
    pub index: IndexKind,

    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub ghost: GhostSettings,
}

/// Knobs for the streaming chat turn.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct ChatSettings {
    /// Number of memories retrieved as context for each message.
    pub memory_top_k: usize,
    /// Maximum number of document characters included in the prompt.
    pub document_prefix_chars: usize,
    /// Generation budget for a chat reply.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Store each completed exchange back into the project's memory.
    pub remember_exchanges: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            memory_top_k: 3,
            document_prefix_chars: 2000,
            max_tokens: 2000,
            temperature: 0.7,
            remember_exchanges: false,
        }
    }
}

/// Knobs for ghost-writing suggestions.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct GhostSettings {
    /// Characters before the cursor sent to the model.
    pub window_chars: usize,
    /// Below this many non-blank characters of context no request is made.
    pub min_context_chars: usize,
    pub max_tokens: u32,
}

impl Default for GhostSettings {
    fn default() -> Self {
        Self {
            window_chars: 500,
            min_context_chars: 10,
            max_tokens: 60,
        }
    }
}

fn default_owner() -> String {
    "local".to_string()
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            database_url: "membrane.db".to_string(),
            owner_id: default_owner(),
            index: IndexKind::default(),
            chat: ChatSettings::default(),
            ghost: GhostSettings::default(),
        }
    }
}

impl MembraneConfig {
    /// Replace the API key with `MEMBRANE_API_KEY` when it is set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_api_key_override(std::env::var(API_KEY_ENV).ok())
    }

    fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|key| !key.trim().is_empty()) {
            debug!("Using API key from {}", API_KEY_ENV);
            self.api_key = key;
        }
        self
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] when the file cannot be read.
/// - [`ConfigError::Yaml`] when the content is not a valid configuration.
pub fn load_config(file: &Path) -> Result<MembraneConfig, ConfigError> {
    info!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: MembraneConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Serialize a configuration to YAML at `file`, creating parent directories.
pub fn write_config(file: &Path, config: &MembraneConfig) -> Result<(), ConfigError> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    fs::write(file, yaml)?;
    Ok(())
}

pub fn establish_connection(db_url: &str) -> Result<SqliteConnection, ConfigError> {
    Ok(SqliteConnection::establish(db_url)?)
}
