//! Storage port for conversations.
//!
//! One uniform contract, two interchangeable backends: the local single
//! durable store and the cloud store (local cache + queued remote sync).
//! Implementations live in the infrastructure crate and are injected as
//! `Arc<dyn ConversationStore>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::model::{
    ConversationMeta, ConversationPatch, ConversationPayload, MetaPatch,
};
use crate::error::Result;

/// Uniform read/write contract for conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Lists non-deleted conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>>;

    /// Loads a conversation payload. Missing or corrupt records yield
    /// `Ok(None)`; callers substitute the empty payload template.
    async fn load_conversation(&self, id: &str) -> Result<Option<ConversationPayload>>;

    /// Returns the id of the current conversation, if one is recorded.
    async fn current_conversation_id(&self) -> Result<Option<String>>;

    /// Records the current conversation id.
    async fn set_current_conversation_id(&self, id: &str) -> Result<()>;

    /// Creates a conversation. Returns `false` on any storage failure
    /// (quota exceeded, serialization error) instead of erroring; callers
    /// fall back to an in-memory-only conversation.
    async fn create_conversation(
        &self,
        id: &str,
        payload: &ConversationPayload,
        timestamp: DateTime<Utc>,
    ) -> bool;

    /// Applies a partial update to a conversation payload and advances its
    /// `updated_at`.
    async fn save_conversation(&self, id: &str, patch: ConversationPatch) -> Result<()>;

    /// Best-effort synchronous dispatch of a full snapshot, used only at
    /// teardown. Must not depend on awaiting a future to completion: the
    /// runtime may be killed before any async continuation runs. Errors are
    /// logged and swallowed.
    fn save_immediately(&self, id: &str, payload: &ConversationPayload, meta: MetaPatch);

    /// Soft-deletes a conversation (tombstone; propagated to remote copies).
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Updates a conversation's title.
    async fn update_title(&self, id: &str, title: &str) -> Result<()>;

    /// Applies a partial update to a conversation's listing record.
    async fn update_meta(&self, id: &str, patch: MetaPatch) -> Result<()>;

    /// Returns the last known conversation list without any I/O.
    fn cached_conversations(&self) -> Vec<ConversationMeta>;
}
