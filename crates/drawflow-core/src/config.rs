//! Engine configuration.
//!
//! Tuning knobs for the persistence engine. Loading from the config file
//! lives in the infrastructure crate; this module only defines the shapes
//! and their defaults.

use serde::{Deserialize, Serialize};

/// User scope applied when no authenticated user is present.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

const DEFAULT_MAX_XML_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_DIAGRAM_VERSIONS: usize = 100;
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_REVALIDATE_TTL_SECS: u64 = 45;
const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 8;

/// Configuration for the optional authenticated cloud store.
///
/// Presence of this section switches the engine from the local-only backend
/// to the cloud backend (local cache + queued remote sync).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the remote conversation API.
    pub base_url: String,
    /// Bearer token for authenticated requests. `None` sends no auth header.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Engine-wide configuration with per-field defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Scope key for all durable records. Defaults to [`ANONYMOUS_USER_ID`].
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Size ceiling for a conversation's diagram xml. Writes above this are
    /// rejected before they reach durable storage.
    #[serde(default = "default_max_xml_bytes")]
    pub max_xml_bytes: usize,

    /// Cap on the diagram-version list. On overflow the oldest version is
    /// evicted and bookmarks are shifted accordingly.
    #[serde(default = "default_max_diagram_versions")]
    pub max_diagram_versions: usize,

    /// Auto-save debounce window in milliseconds. 300 ms is the aggressive
    /// cloud-auto-save figure; local-only deployments may prefer 800 ms.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Stale-while-revalidate TTL for cloud-mode list/detail reads.
    #[serde(default = "default_revalidate_ttl_secs")]
    pub revalidate_ttl_secs: u64,

    /// Attempts before the sync outbox gives up on an entry. The next
    /// qualifying change re-enqueues it.
    #[serde(default = "default_outbox_max_attempts")]
    pub outbox_max_attempts: u32,

    /// Cloud store endpoint. `None` keeps the engine local-only.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

fn default_user_id() -> String {
    ANONYMOUS_USER_ID.to_string()
}

fn default_max_xml_bytes() -> usize {
    DEFAULT_MAX_XML_BYTES
}

fn default_max_diagram_versions() -> usize {
    DEFAULT_MAX_DIAGRAM_VERSIONS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_revalidate_ttl_secs() -> u64 {
    DEFAULT_REVALIDATE_TTL_SECS
}

fn default_outbox_max_attempts() -> u32 {
    DEFAULT_OUTBOX_MAX_ATTEMPTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            max_xml_bytes: default_max_xml_bytes(),
            max_diagram_versions: default_max_diagram_versions(),
            debounce_ms: default_debounce_ms(),
            revalidate_ttl_secs: default_revalidate_ttl_secs(),
            outbox_max_attempts: default_outbox_max_attempts(),
            remote: None,
        }
    }
}

impl EngineConfig {
    /// True when a remote endpoint is configured (cloud mode).
    pub fn is_cloud(&self) -> bool {
        self.remote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_only() {
        let config = EngineConfig::default();
        assert_eq!(config.user_id, ANONYMOUS_USER_ID);
        assert_eq!(config.max_xml_bytes, 5 * 1024 * 1024);
        assert_eq!(config.max_diagram_versions, 100);
        assert_eq!(config.debounce_ms, 300);
        assert!(!config.is_cloud());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            debounce_ms = 800

            [remote]
            base_url = "https://sync.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce_ms, 800);
        assert_eq!(config.user_id, ANONYMOUS_USER_ID);
        assert!(config.is_cloud());
        assert_eq!(config.remote.unwrap().api_key, None);
    }
}
