//! Engine assembly.
//!
//! Builds the storage backend the configuration asks for: the local-only
//! store, or the cloud store (local cache + remote API + sync outbox) when a
//! remote endpoint is configured. Both come back behind the same port.

use std::sync::Arc;

use drawflow_core::config::EngineConfig;
use drawflow_core::conversation::ConversationStore;
use drawflow_core::error::Result;

use crate::cloud_store::CloudConversationStore;
use crate::local_store::LocalConversationStore;
use crate::outbox::SyncOutbox;
use crate::paths::DrawflowPaths;
use crate::remote::HttpRemoteApi;

/// Builds the conversation store for the given configuration and starts its
/// background workers.
pub async fn build_store(config: &EngineConfig) -> Result<Arc<dyn ConversationStore>> {
    let local = Arc::new(LocalConversationStore::default_location(config).await?);
    let Some(remote_config) = &config.remote else {
        tracing::info!("[Bootstrap] local-only storage for user {}", config.user_id);
        return Ok(local);
    };

    tracing::info!(
        "[Bootstrap] cloud storage for user {} via {}",
        config.user_id,
        remote_config.base_url
    );
    let remote = Arc::new(HttpRemoteApi::new(remote_config));
    let outbox_path = DrawflowPaths::user_dir(&config.user_id)?.join("outbox.json");
    let outbox = Arc::new(SyncOutbox::load(outbox_path, config.outbox_max_attempts));
    let store = CloudConversationStore::new(local, remote, outbox, config);
    store.spawn_sync_worker();
    Ok(store)
}
