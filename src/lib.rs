//! # Membrane (library root)
//!
//! Core of a writing assistant that remembers what each project is about:
//!
//! - Per-project semantic memory: append-only embedding collections with
//!   top-k retrieval (`vector_store`, `index`, `embedding`).
//! - Streaming chat with retrieved context, a durable transcript and
//!   ghost-writing suggestions (`chat`, `api`, `template`, `transcript`).
//! - Configuration & DB integration (`config`, `database`, `models`, `schema`).
//! - CLI parsing (`commands`).
//!
//! Long-lived services (embedder, database, completion provider) are built
//! once by the caller and passed in; nothing here is global.
//!
//! ## Configuration location
//! The default config file lives in the per-platform configuration directory:
//!
//! - macOS: `~/Library/Application Support/com.membrane.membrane/config.yaml`
//! - Linux (XDG): `~/.config/membrane/config.yaml`
//! - Windows: `C:\Users\<you>\AppData\Roaming\membrane\membrane\config\config.yaml`
//!
//! ## Modules
//! - [`api`], [`chat`], [`commands`], [`config`], [`database`], [`embedding`],
//!   [`error`], [`index`], [`models`], [`schema`], [`template`], [`transcript`],
//!   [`vector_store`]

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod schema;
pub mod template;
pub mod transcript;
pub mod vector_store;

#[cfg(test)]
mod testing;

use crate::error::ConfigError;

/// Return the per-platform configuration directory used by Membrane.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// [`ConfigError::NoConfigDir`] if the platform configuration directory cannot
/// be determined (rare, but possible in sandboxed environments).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let proj_dirs =
        ProjectDirs::from("com", "membrane", "membrane").ok_or(ConfigError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// `config_dir()/config.yaml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_is_inside_config_dir() {
        // Sandboxed CI may have no home directory at all.
        if let Ok(dir) = config_dir() {
            let path = default_config_path().unwrap();
            assert_eq!(path.parent(), Some(dir.as_path()));
            assert!(path.ends_with("config.yaml"));
        }
    }
}
