//! In-memory conversation store.
//!
//! Implements the full storage contract over process memory. Used as the
//! injectable fake in tests and as the degradation target when durable
//! storage rejects a conversation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use drawflow_core::conversation::{
    ConversationMeta, ConversationPatch, ConversationPayload, ConversationStore, MetaPatch,
};
use drawflow_core::error::Result;

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<String, (ConversationMeta, ConversationPayload)>,
    current: Option<String>,
}

/// Conversation store with no durable backing.
#[derive(Default)]
pub struct MemoryConversationStore {
    state: RwLock<MemoryState>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>> {
        Ok(self.cached_conversations())
    }

    async fn load_conversation(&self, id: &str) -> Result<Option<ConversationPayload>> {
        let state = self.state.read().unwrap();
        Ok(state.conversations.get(id).map(|(_, payload)| payload.clone()))
    }

    async fn current_conversation_id(&self) -> Result<Option<String>> {
        Ok(self.state.read().unwrap().current.clone())
    }

    async fn set_current_conversation_id(&self, id: &str) -> Result<()> {
        self.state.write().unwrap().current = Some(id.to_string());
        Ok(())
    }

    async fn create_conversation(
        &self,
        id: &str,
        payload: &ConversationPayload,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.write().unwrap();
        state.conversations.insert(
            id.to_string(),
            (ConversationMeta::new(id, timestamp), payload.clone()),
        );
        true
    }

    async fn save_conversation(&self, id: &str, patch: ConversationPatch) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let entry = state.conversations.entry(id.to_string()).or_insert_with(|| {
            (ConversationMeta::new(id, Utc::now()), ConversationPayload::empty())
        });
        patch.apply(&mut entry.1);
        entry.0.touch(Utc::now());
        Ok(())
    }

    fn save_immediately(&self, id: &str, payload: &ConversationPayload, meta_patch: MetaPatch) {
        let mut state = self.state.write().unwrap();
        let entry = state.conversations.entry(id.to_string()).or_insert_with(|| {
            (ConversationMeta::new(id, Utc::now()), ConversationPayload::empty())
        });
        entry.1 = payload.clone();
        meta_patch.apply(&mut entry.0);
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some((meta, _)) = state.conversations.get_mut(id) {
            meta.deleted = true;
            meta.touch(Utc::now());
        }
        Ok(())
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some((meta, _)) = state.conversations.get_mut(id) {
            meta.title = Some(title.to_string());
            meta.touch(Utc::now());
        }
        Ok(())
    }

    async fn update_meta(&self, id: &str, patch: MetaPatch) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some((meta, _)) = state.conversations.get_mut(id) {
            patch.apply(meta);
        }
        Ok(())
    }

    fn cached_conversations(&self) -> Vec<ConversationMeta> {
        let state = self.state.read().unwrap();
        let mut metas: Vec<ConversationMeta> = state
            .conversations
            .values()
            .map(|(meta, _)| meta.clone())
            .filter(|meta| !meta.deleted)
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        metas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn behaves_like_the_contract() {
        let store = MemoryConversationStore::new();

        assert!(
            store
                .create_conversation("c1", &ConversationPayload::empty(), Utc::now())
                .await
        );
        store.set_current_conversation_id("c1").await.unwrap();

        store
            .save_conversation(
                "c1",
                ConversationPatch {
                    xml: Some("<mxfile/>".to_string()),
                    ..ConversationPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            store.load_conversation("c1").await.unwrap().unwrap().xml,
            "<mxfile/>"
        );
        assert_eq!(
            store.current_conversation_id().await.unwrap(),
            Some("c1".to_string())
        );

        store.delete_conversation("c1").await.unwrap();
        assert!(store.list_conversations().await.unwrap().is_empty());
    }
}
