//! Unified path management for drawflow storage.
//!
//! All durable engine state lives under one data directory, scoped per user
//! (`<data>/<user_id>/…`, with `anonymous` for unauthenticated use). The
//! config file lives in the platform config directory.

use std::path::PathBuf;

use drawflow_core::error::{DrawflowError, Result};

/// Unified path resolution for drawflow.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/drawflow/
/// └── drawflow.toml                # Engine configuration
///
/// ~/.local/share/drawflow/
/// └── <user_id>/
///     ├── conversations.json       # Conversation list (metas)
///     ├── current_conversation.txt # Current-conversation pointer
///     ├── outbox.json              # Cloud-mode sync outbox
///     └── conversations/
///         ├── <conversation-id>.json
///         └── ...
/// ```
pub struct DrawflowPaths;

impl DrawflowPaths {
    /// Returns the drawflow configuration directory.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("drawflow"))
            .ok_or_else(|| DrawflowError::config("cannot determine platform config directory"))
    }

    /// Returns the drawflow data directory.
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("drawflow"))
            .ok_or_else(|| DrawflowError::config("cannot determine platform data directory"))
    }

    /// Returns the per-user storage directory.
    pub fn user_dir(user_id: &str) -> Result<PathBuf> {
        Ok(Self::data_dir()?.join(user_id))
    }

    /// Returns the engine config file path.
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("drawflow.toml"))
    }
}
