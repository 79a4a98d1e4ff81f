//! Cloud conversation store.
//!
//! Wraps the local store as a read-through cache in front of the remote
//! conversation API:
//!
//! - Reads return the cached value immediately; a read past its TTL also
//!   spawns an asynchronous remote refresh that overwrites the cache for
//!   subsequent reads (stale-while-revalidate).
//! - Writes are optimistic: the cache is updated synchronously before any
//!   remote traffic, then a push is enqueued on the durable outbox. The UI
//!   never waits on the network.
//! - A failed push invalidates the affected entry's freshness so the next
//!   read refetches and reconciles, rather than attempting a manual rollback
//!   of the optimistic update.
//!
//! Conflict policy is last-write-wins by wall-clock `updated_at`. Divergent
//! concurrent edits from two live sessions are not merged; this is a
//! deliberate simplification, not an oversight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use drawflow_core::config::EngineConfig;
use drawflow_core::conversation::{
    ConversationMeta, ConversationPatch, ConversationPayload, ConversationStore, MetaPatch,
};
use drawflow_core::error::Result;

use crate::local_store::LocalConversationStore;
use crate::outbox::SyncOutbox;
use crate::remote::{ConversationUpsert, PushRequest, RemoteConversationApi};

/// Freshness key for the conversation list query.
const LIST_KEY: &str = "__list__";

/// Page size used when revalidating the conversation list.
const LIST_PAGE_LIMIT: usize = 100;

type FreshnessMap = Arc<Mutex<HashMap<String, Instant>>>;

/// Optimistic local-cache/remote-sync backend.
pub struct CloudConversationStore {
    cache: Arc<LocalConversationStore>,
    remote: Arc<dyn RemoteConversationApi>,
    outbox: Arc<SyncOutbox>,
    ttl: Duration,
    freshness: FreshnessMap,
}

impl CloudConversationStore {
    pub fn new(
        cache: Arc<LocalConversationStore>,
        remote: Arc<dyn RemoteConversationApi>,
        outbox: Arc<SyncOutbox>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            remote,
            outbox,
            ttl: Duration::from_secs(config.revalidate_ttl_secs),
            freshness: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Spawns the outbox drain worker. The worker runs until the runtime
    /// shuts down; aborting the returned handle stops it early.
    pub fn spawn_sync_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.drain_outbox().await })
    }

    /// Drains pending pushes. Each push carries the conversation's current
    /// cache snapshot, not the enqueue-time one, so later completion of an
    /// older push cannot regress state.
    async fn drain_outbox(&self) {
        loop {
            let Some(entry) = self.outbox.next_entry() else {
                self.outbox.notified().await;
                continue;
            };
            let id = entry.conversation_id;

            let Some(upsert) = self.build_upsert(&id).await else {
                // Nothing known locally anymore; drop the entry.
                self.outbox.complete(&id);
                continue;
            };

            match self
                .remote
                .push(PushRequest {
                    conversations: vec![upsert],
                })
                .await
            {
                Ok(ack) => {
                    tracing::debug!("[CloudStore] pushed {} (accepted {})", id, ack.accepted);
                    self.outbox.complete(&id);
                }
                Err(e) => {
                    tracing::warn!("[CloudStore] push of {} failed: {}", id, e);
                    // Force a reconciling refetch on the next read.
                    invalidate(&self.freshness, &id);
                    invalidate(&self.freshness, LIST_KEY);
                    if let Some(backoff) = self.outbox.record_failure(&id) {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }

    /// Builds the full-snapshot upsert for a conversation from the cache.
    /// Tombstoned conversations produce a payload-less tombstone record.
    async fn build_upsert(&self, id: &str) -> Option<ConversationUpsert> {
        let meta = self.cache.raw_meta(id)?;
        let payload = if meta.deleted {
            None
        } else {
            self.cache.load_conversation(id).await.ok().flatten()
        };
        Some(ConversationUpsert {
            id: id.to_string(),
            payload,
            deleted: meta.deleted.then_some(true),
            title: meta.title,
            created_at: Some(meta.created_at),
            updated_at: Some(meta.updated_at),
        })
    }

    fn is_stale(&self, key: &str) -> bool {
        let freshness = self.freshness.lock().unwrap();
        match freshness.get(key) {
            Some(refreshed_at) => refreshed_at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Spawns a detail revalidation that overwrites the cache on completion.
    /// Skipped while a push is pending for the conversation: the local copy
    /// is ahead of the remote and must not be clobbered.
    fn spawn_detail_refresh(&self, id: String) {
        let cache = Arc::clone(&self.cache);
        let remote = Arc::clone(&self.remote);
        let outbox = Arc::clone(&self.outbox);
        let freshness = Arc::clone(&self.freshness);
        tokio::spawn(async move {
            match remote.get_by_id(&id).await {
                Ok(Some(conversation)) => {
                    if outbox.pending_for(&id) {
                        tracing::debug!(
                            "[CloudStore] local {} has pending push, skipping overwrite",
                            id
                        );
                        return;
                    }
                    if let Err(e) = cache
                        .save_conversation(&id, ConversationPatch::full(&conversation.payload))
                        .await
                    {
                        tracing::warn!("[CloudStore] cache refresh of {} failed: {}", id, e);
                        return;
                    }
                    mark_fresh(&freshness, &id);
                }
                Ok(None) => mark_fresh(&freshness, &id),
                Err(e) => tracing::debug!("[CloudStore] refresh of {} failed: {}", id, e),
            }
        });
    }

    /// Spawns a list revalidation, merging remote metas into the cache by
    /// last-write-wins on `updated_at`.
    fn spawn_list_refresh(&self) {
        let cache = Arc::clone(&self.cache);
        let remote = Arc::clone(&self.remote);
        let freshness = Arc::clone(&self.freshness);
        tokio::spawn(async move {
            match remote.list_metas(LIST_PAGE_LIMIT, 0).await {
                Ok(page) => {
                    for meta in page.conversations {
                        let local_wins = cache
                            .raw_meta(&meta.id)
                            .is_some_and(|local| local.updated_at >= meta.updated_at);
                        if local_wins {
                            continue;
                        }
                        let patch = MetaPatch {
                            title: meta.title,
                            updated_at: Some(meta.updated_at),
                            deleted: Some(meta.deleted),
                        };
                        if let Err(e) = cache.update_meta(&meta.id, patch).await {
                            tracing::warn!(
                                "[CloudStore] list refresh of {} failed: {}",
                                meta.id,
                                e
                            );
                        }
                    }
                    mark_fresh(&freshness, LIST_KEY);
                }
                Err(e) => tracing::debug!("[CloudStore] list refresh failed: {}", e),
            }
        });
    }
}

fn mark_fresh(freshness: &FreshnessMap, key: &str) {
    freshness
        .lock()
        .unwrap()
        .insert(key.to_string(), Instant::now());
}

fn invalidate(freshness: &FreshnessMap, key: &str) {
    freshness.lock().unwrap().remove(key);
}

#[async_trait]
impl ConversationStore for CloudConversationStore {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>> {
        let metas = self.cache.list_conversations().await?;
        if self.is_stale(LIST_KEY) {
            self.spawn_list_refresh();
        }
        Ok(metas)
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<ConversationPayload>> {
        let payload = self.cache.load_conversation(id).await?;
        if self.is_stale(id) {
            self.spawn_detail_refresh(id.to_string());
        }
        Ok(payload)
    }

    // The current-conversation pointer is device-local state; it is never
    // synchronized.
    async fn current_conversation_id(&self) -> Result<Option<String>> {
        self.cache.current_conversation_id().await
    }

    async fn set_current_conversation_id(&self, id: &str) -> Result<()> {
        self.cache.set_current_conversation_id(id).await
    }

    async fn create_conversation(
        &self,
        id: &str,
        payload: &ConversationPayload,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let created = self.cache.create_conversation(id, payload, timestamp).await;
        if created {
            mark_fresh(&self.freshness, id);
            self.outbox.enqueue(id);
        }
        created
    }

    async fn save_conversation(&self, id: &str, patch: ConversationPatch) -> Result<()> {
        self.cache.save_conversation(id, patch).await?;
        mark_fresh(&self.freshness, id);
        self.outbox.enqueue(id);
        Ok(())
    }

    fn save_immediately(&self, id: &str, payload: &ConversationPayload, meta_patch: MetaPatch) {
        let updated_at = meta_patch.updated_at;
        self.cache.save_immediately(id, payload, meta_patch);
        // Out-of-band teardown transport; delivery is at-most-attempted.
        self.remote.push_detached(PushRequest {
            conversations: vec![ConversationUpsert {
                id: id.to_string(),
                payload: Some(payload.clone()),
                deleted: None,
                title: None,
                created_at: None,
                updated_at,
            }],
        });
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.cache.delete_conversation(id).await?;
        // The tombstone propagates through the same push path.
        self.outbox.enqueue(id);
        Ok(())
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.cache.update_title(id, title).await?;
        self.outbox.enqueue(id);
        Ok(())
    }

    async fn update_meta(&self, id: &str, patch: MetaPatch) -> Result<()> {
        self.cache.update_meta(id, patch).await?;
        self.outbox.enqueue(id);
        Ok(())
    }

    fn cached_conversations(&self) -> Vec<ConversationMeta> {
        self.cache.cached_conversations()
    }
}
