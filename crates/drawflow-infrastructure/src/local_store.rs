//! Local single-durable-store backend.
//!
//! Conversations persist as JSON files in a per-user directory: one file per
//! conversation payload, one document for the conversation list, and a plain
//! text file for the current-conversation pointer. In cloud mode this same
//! store doubles as the read-through cache.
//!
//! Directory layout:
//! ```text
//! base_dir/
//! ├── conversations.json           # [ConversationMeta], tombstones included
//! ├── current_conversation.txt
//! └── conversations/
//!     ├── <conversation-id>.json   # ConversationPayload
//!     └── ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use drawflow_core::config::EngineConfig;
use drawflow_core::conversation::{
    ConversationMeta, ConversationPatch, ConversationPayload, ConversationStore, MetaPatch,
};
use drawflow_core::error::Result;

use crate::paths::DrawflowPaths;

/// File-backed conversation store scoped to one user.
pub struct LocalConversationStore {
    base_dir: PathBuf,
    max_xml_bytes: usize,
    /// Last known conversation list (tombstones included). Backs the no-I/O
    /// `cached_conversations` read and the teardown write path.
    meta_cache: RwLock<Vec<ConversationMeta>>,
}

impl LocalConversationStore {
    /// Creates a store rooted at `base_dir`, creating the directory
    /// structure if needed and priming the meta cache from disk.
    pub async fn new(base_dir: impl AsRef<Path>, max_xml_bytes: usize) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(base_dir.join("conversations")).await?;

        let store = Self {
            base_dir,
            max_xml_bytes,
            meta_cache: RwLock::new(Vec::new()),
        };
        let metas = store.read_metas().await;
        *store.meta_cache.write().unwrap() = metas;
        Ok(store)
    }

    /// Creates a store at the default per-user location.
    pub async fn default_location(config: &EngineConfig) -> Result<Self> {
        let base_dir = DrawflowPaths::user_dir(&config.user_id)?;
        Self::new(base_dir, config.max_xml_bytes).await
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("conversations").join(format!("{id}.json"))
    }

    fn metas_path(&self) -> PathBuf {
        self.base_dir.join("conversations.json")
    }

    fn pointer_path(&self) -> PathBuf {
        self.base_dir.join("current_conversation.txt")
    }

    /// Reads the meta list document. Missing or corrupt documents yield an
    /// empty list rather than an error.
    async fn read_metas(&self) -> Vec<ConversationMeta> {
        let path = self.metas_path();
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("[LocalStore] failed to read {:?}: {}", path, e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&json) {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!("[LocalStore] corrupt conversation list at {:?}: {}", path, e);
                Vec::new()
            }
        }
    }

    /// Persists the meta list document and refreshes the cache.
    async fn write_metas(&self, metas: Vec<ConversationMeta>) -> Result<()> {
        let json = serde_json::to_string_pretty(&metas)?;
        fs::write(self.metas_path(), json).await?;
        *self.meta_cache.write().unwrap() = metas;
        Ok(())
    }

    /// Applies `mutate` to the meta entry for `id`, inserting a fresh record
    /// when none exists, then persists the list.
    async fn mutate_meta<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ConversationMeta),
    {
        let mut metas = self.read_metas().await;
        match metas.iter_mut().find(|meta| meta.id == id) {
            Some(meta) => mutate(meta),
            None => {
                let mut meta = ConversationMeta::new(id, Utc::now());
                mutate(&mut meta);
                metas.push(meta);
            }
        }
        self.write_metas(metas).await
    }

    /// Full meta record for `id`, tombstones included.
    pub(crate) fn raw_meta(&self, id: &str) -> Option<ConversationMeta> {
        self.meta_cache
            .read()
            .unwrap()
            .iter()
            .find(|meta| meta.id == id)
            .cloned()
    }
}

#[async_trait]
impl ConversationStore for LocalConversationStore {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>> {
        let metas = self.read_metas().await;
        *self.meta_cache.write().unwrap() = metas.clone();

        let mut visible: Vec<ConversationMeta> =
            metas.into_iter().filter(|meta| !meta.deleted).collect();
        // Sort by updated_at descending (most recent first)
        visible.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(visible)
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<ConversationPayload>> {
        let path = self.conversation_path(id);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&json) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                tracing::warn!("[LocalStore] corrupt conversation at {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    async fn current_conversation_id(&self) -> Result<Option<String>> {
        let path = self.pointer_path();
        match fs::read_to_string(&path).await {
            Ok(id) => {
                let id = id.trim().to_string();
                Ok((!id.is_empty()).then_some(id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_current_conversation_id(&self, id: &str) -> Result<()> {
        fs::write(self.pointer_path(), id).await?;
        Ok(())
    }

    async fn create_conversation(
        &self,
        id: &str,
        payload: &ConversationPayload,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let result: Result<()> = async {
            payload.validate(self.max_xml_bytes)?;
            let json = serde_json::to_string_pretty(payload)?;
            fs::write(self.conversation_path(id), json).await?;

            let mut metas = self.read_metas().await;
            if !metas.iter().any(|meta| meta.id == id) {
                metas.push(ConversationMeta::new(id, timestamp));
            }
            self.write_metas(metas).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[LocalStore] failed to create conversation {}: {}", id, e);
                false
            }
        }
    }

    async fn save_conversation(&self, id: &str, patch: ConversationPatch) -> Result<()> {
        let mut payload = self
            .load_conversation(id)
            .await?
            .unwrap_or_else(ConversationPayload::empty);
        patch.apply(&mut payload);
        payload.validate(self.max_xml_bytes)?;

        let json = serde_json::to_string_pretty(&payload)?;
        fs::write(self.conversation_path(id), json).await?;
        self.mutate_meta(id, |meta| meta.touch(Utc::now())).await
    }

    fn save_immediately(&self, id: &str, payload: &ConversationPayload, meta_patch: MetaPatch) {
        // Teardown path: blocking writes on purpose. The runtime may be torn
        // down before any spawned future runs, so this never awaits.
        if payload.validate(self.max_xml_bytes).is_err() {
            tracing::debug!("[LocalStore] teardown snapshot for {} rejected", id);
            return;
        }
        let json = match serde_json::to_string_pretty(payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("[LocalStore] teardown serialization for {} failed: {}", id, e);
                return;
            }
        };
        if let Err(e) = std::fs::write(self.conversation_path(id), json) {
            tracing::warn!("[LocalStore] teardown write for {} failed: {}", id, e);
            return;
        }

        let mut metas = self.meta_cache.read().unwrap().clone();
        match metas.iter_mut().find(|meta| meta.id == id) {
            Some(meta) => meta_patch.apply(meta),
            None => {
                let mut meta = ConversationMeta::new(id, Utc::now());
                meta_patch.apply(&mut meta);
                metas.push(meta);
            }
        }
        match serde_json::to_string_pretty(&metas) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.metas_path(), json) {
                    tracing::warn!("[LocalStore] teardown meta write failed: {}", e);
                    return;
                }
                *self.meta_cache.write().unwrap() = metas;
            }
            Err(e) => tracing::warn!("[LocalStore] teardown meta serialization failed: {}", e),
        }
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.mutate_meta(id, |meta| {
            meta.deleted = true;
            meta.touch(Utc::now());
        })
        .await?;

        // The payload itself can go; the tombstoned meta carries the flag.
        match fs::remove_file(self.conversation_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let title = title.to_string();
        self.mutate_meta(id, move |meta| {
            meta.title = Some(title);
            meta.touch(Utc::now());
        })
        .await
    }

    async fn update_meta(&self, id: &str, patch: MetaPatch) -> Result<()> {
        self.mutate_meta(id, move |meta| patch.apply(meta)).await
    }

    fn cached_conversations(&self) -> Vec<ConversationMeta> {
        self.meta_cache
            .read()
            .unwrap()
            .iter()
            .filter(|meta| !meta.deleted)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CEILING: usize = 5 * 1024 * 1024;

    async fn store_in(dir: &TempDir) -> LocalConversationStore {
        LocalConversationStore::new(dir.path(), CEILING)
            .await
            .unwrap()
    }

    fn payload_with_xml(xml: &str) -> ConversationPayload {
        let mut payload = ConversationPayload::empty();
        payload.xml = xml.to_string();
        payload
    }

    #[tokio::test]
    async fn create_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        assert!(
            store
                .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
                .await
        );
        store
            .save_conversation(
                "c1",
                ConversationPatch {
                    xml: Some("<mxfile>v1</mxfile>".to_string()),
                    ..ConversationPatch::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.load_conversation("c1").await.unwrap().unwrap();
        assert_eq!(loaded.xml, "<mxfile>v1</mxfile>");
    }

    #[tokio::test]
    async fn load_missing_conversation_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert!(store.load_conversation("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_falls_back_to_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        std::fs::write(store.conversation_path("c1"), "{not json").unwrap();

        assert!(store.load_conversation("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_most_recent_first_and_hides_tombstones() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let t0 = Utc::now();
        store
            .create_conversation("old", &ConversationPayload::empty(), t0)
            .await;
        store
            .create_conversation(
                "new",
                &ConversationPayload::empty(),
                t0 + chrono::Duration::seconds(5),
            )
            .await;
        store
            .create_conversation(
                "gone",
                &ConversationPayload::empty(),
                t0 + chrono::Duration::seconds(10),
            )
            .await;
        store.delete_conversation("gone").await.unwrap();

        let metas = store.list_conversations().await.unwrap();
        let ids: Vec<&str> = metas.iter().map(|meta| meta.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn deleted_payload_file_is_removed_but_tombstone_remains() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        store.delete_conversation("c1").await.unwrap();

        assert!(!store.conversation_path("c1").exists());
        let tombstone = store.raw_meta("c1").unwrap();
        assert!(tombstone.deleted);
        assert!(store.load_conversation("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_pointer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        assert_eq!(store.current_conversation_id().await.unwrap(), None);
        store.set_current_conversation_id("c1").await.unwrap();
        assert_eq!(
            store.current_conversation_id().await.unwrap(),
            Some("c1".to_string())
        );
    }

    #[tokio::test]
    async fn create_returns_false_on_storage_failure() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        // Replace the conversations directory with a file so writes fail.
        std::fs::remove_dir_all(dir.path().join("conversations")).unwrap();
        std::fs::write(dir.path().join("conversations"), "blocked").unwrap();

        assert!(
            !store
                .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
                .await
        );
    }

    #[tokio::test]
    async fn oversized_xml_never_reaches_disk() {
        let dir = TempDir::new().unwrap();
        let store = LocalConversationStore::new(dir.path(), 64).await.unwrap();
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        let err = store
            .save_conversation(
                "c1",
                ConversationPatch {
                    xml: Some("x".repeat(128)),
                    ..ConversationPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let on_disk = store.load_conversation("c1").await.unwrap().unwrap();
        assert_eq!(on_disk.xml, "");
    }

    #[tokio::test]
    async fn save_immediately_writes_without_awaiting() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        store.save_immediately(
            "c1",
            &payload_with_xml("<mxfile>teardown</mxfile>"),
            MetaPatch::touch(Utc::now()),
        );

        // Visible on disk immediately, no await in between.
        let json = std::fs::read_to_string(store.conversation_path("c1")).unwrap();
        let payload: ConversationPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload.xml, "<mxfile>teardown</mxfile>");
    }

    #[tokio::test]
    async fn updated_at_is_monotonic_across_saves() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        store
            .save_conversation("c1", ConversationPatch::default())
            .await
            .unwrap();
        let first = store.raw_meta("c1").unwrap().updated_at;

        store
            .save_conversation("c1", ConversationPatch::default())
            .await
            .unwrap();
        let second = store.raw_meta("c1").unwrap().updated_at;

        assert!(second >= first);
    }

    #[tokio::test]
    async fn cached_conversations_serve_without_io() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;
        store.list_conversations().await.unwrap();

        // Remove the backing document; the cache still answers.
        std::fs::remove_file(store.metas_path()).unwrap();
        let cached = store.cached_conversations();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "c1");
    }

    #[tokio::test]
    async fn update_title_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
            .await;

        store.update_title("c1", "Network diagram").await.unwrap();

        let metas = store.list_conversations().await.unwrap();
        assert_eq!(metas[0].title.as_deref(), Some("Network diagram"));
    }
}
