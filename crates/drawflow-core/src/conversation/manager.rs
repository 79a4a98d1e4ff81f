//! Conversation lifecycle management.
//!
//! `ConversationManager` is the engine facade: it owns the active
//! conversation's in-memory state (messages, diagram xml, version history),
//! decides when that state becomes a durable write, and sequences the forced
//! flushes around conversation switches, deletions and teardown. Storage and
//! rendering are reached only through their injected ports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conversation::message::ChatMessage;
use crate::conversation::model::{
    ConversationMeta, ConversationPatch, ConversationPayload, MetaPatch,
};
use crate::conversation::repository::ConversationStore;
use crate::error::{DrawflowError, Result};
use crate::fingerprint::ChangeFingerprint;
use crate::history::{DiagramVersionHistory, HistoryView};
use crate::scheduler::PersistenceScheduler;
use crate::surface::DiagramSurface;

/// Working state of the active conversation.
struct ManagerState {
    active_id: String,
    messages: Vec<ChatMessage>,
    xml: String,
    history: DiagramVersionHistory,
    session_id: String,
    scheduler: PersistenceScheduler,
    /// Set when storage rejected the conversation's creation; the
    /// conversation lives only in memory and saves are skipped.
    ephemeral: bool,
}

impl ManagerState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            active_id: String::new(),
            messages: Vec::new(),
            xml: String::new(),
            history: DiagramVersionHistory::new(config.max_diagram_versions),
            session_id: String::new(),
            scheduler: PersistenceScheduler::new(Duration::from_millis(config.debounce_ms)),
            ephemeral: false,
        }
    }

    /// Replaces the working state with a loaded payload.
    fn load(&mut self, id: String, payload: ConversationPayload, config: &EngineConfig) {
        self.active_id = id;
        self.messages = payload.messages;
        self.xml = payload.xml;
        self.history = DiagramVersionHistory::from_parts(
            payload.diagram_versions,
            payload.diagram_version_cursor,
            payload.diagram_version_marks,
            config.max_diagram_versions,
        );
        self.session_id = payload.session_id;
        self.scheduler = PersistenceScheduler::new(Duration::from_millis(config.debounce_ms));
        self.ephemeral = false;
    }

    /// Full snapshot of the working state as a durable payload.
    fn snapshot(&self) -> ConversationPayload {
        let (diagram_versions, diagram_version_cursor, diagram_version_marks) =
            self.history.clone().into_parts();
        ConversationPayload {
            messages: self.messages.clone(),
            xml: self.xml.clone(),
            diagram_versions,
            diagram_version_cursor,
            diagram_version_marks,
            session_id: self.session_id.clone(),
        }
    }

    fn fingerprint(&self) -> ChangeFingerprint {
        ChangeFingerprint::of_parts(
            self.messages.len(),
            &self.xml,
            self.history.versions().len(),
            self.history.cursor(),
        )
    }
}

/// Engine facade over one active conversation and its storage backend.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    surface: Arc<dyn DiagramSurface>,
    config: EngineConfig,
    state: Mutex<ManagerState>,
}

impl ConversationManager {
    /// Creates a manager. Call [`Self::init`] before use to restore the
    /// current conversation from storage.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        surface: Arc<dyn DiagramSurface>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let state = ManagerState::new(&config);
        Arc::new(Self {
            store,
            surface,
            config,
            state: Mutex::new(state),
        })
    }

    /// Restores the recorded current conversation, or starts a fresh one
    /// when none is recorded. Missing or corrupt payloads fall back to the
    /// empty template.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let current = self.store.current_conversation_id().await?;
        match current {
            Some(id) => {
                let payload = self
                    .store
                    .load_conversation(&id)
                    .await?
                    .unwrap_or_else(ConversationPayload::empty);
                let mut state = self.state.lock().await;
                state.load(id, payload, &self.config);
                let fingerprint = state.fingerprint();
                state.scheduler.mark_saved(fingerprint);
                self.render_current(&state)?;
                Ok(())
            }
            None => self.new_conversation().await.map(|_| ()),
        }
    }

    /// Starts a new chat: flushes the outgoing conversation, creates an
    /// empty one and makes it current. Returns the new conversation id.
    ///
    /// When storage rejects the creation the conversation continues
    /// in-memory-only rather than failing the caller.
    pub async fn new_conversation(self: &Arc<Self>) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.flush_state(&mut state).await {
            tracing::warn!(
                "[ConversationManager] flush before new chat failed: {}",
                e
            );
        }
        let id = self.create_fresh(&mut state).await?;
        self.surface.clear()?;
        Ok(id)
    }

    /// Switches the active conversation. The outgoing conversation's pending
    /// state is flushed (timer cancelled, written immediately) strictly
    /// before the incoming payload is loaded and rendered.
    pub async fn switch_conversation(self: &Arc<Self>, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.active_id == id {
            return Ok(());
        }
        if let Err(e) = self.flush_state(&mut state).await {
            tracing::warn!("[ConversationManager] flush before switch failed: {}", e);
        }
        let payload = self
            .store
            .load_conversation(id)
            .await?
            .unwrap_or_else(ConversationPayload::empty);
        state.load(id.to_string(), payload, &self.config);
        let fingerprint = state.fingerprint();
        state.scheduler.mark_saved(fingerprint);
        self.render_current(&state)?;
        self.store.set_current_conversation_id(id).await?;
        Ok(())
    }

    /// Soft-deletes a conversation. Deleting the active one switches to the
    /// most recently updated remaining conversation; deleting the last one
    /// creates a fresh empty conversation and makes it current.
    pub async fn delete_conversation(self: &Arc<Self>, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let deleting_active = state.active_id == id;
        if deleting_active
            && let Err(e) = self.flush_state(&mut state).await
        {
            tracing::warn!("[ConversationManager] flush before delete failed: {}", e);
        }
        self.store.delete_conversation(id).await?;
        if !deleting_active {
            return Ok(());
        }

        let remaining = self.store.list_conversations().await?;
        match remaining.first() {
            Some(meta) => {
                let payload = self
                    .store
                    .load_conversation(&meta.id)
                    .await?
                    .unwrap_or_else(ConversationPayload::empty);
                state.load(meta.id.clone(), payload, &self.config);
                let fingerprint = state.fingerprint();
                state.scheduler.mark_saved(fingerprint);
                self.render_current(&state)?;
                self.store.set_current_conversation_id(&meta.id).await?;
            }
            None => {
                self.create_fresh(&mut state).await?;
                self.surface.clear()?;
            }
        }
        Ok(())
    }

    /// Replaces the message list (collaborator input from the chat pipeline).
    pub async fn set_messages(self: &Arc<Self>, messages: Vec<ChatMessage>) {
        let mut state = self.state.lock().await;
        state.messages = messages;
        self.arm_autosave(&mut state);
    }

    /// Appends one message.
    pub async fn push_message(self: &Arc<Self>, message: ChatMessage) {
        let mut state = self.state.lock().await;
        state.messages.push(message);
        self.arm_autosave(&mut state);
    }

    /// Replaces the current diagram xml (collaborator input from the
    /// rendering surface). Oversized xml is rejected and state is left
    /// unchanged.
    pub async fn set_xml(self: &Arc<Self>, xml: &str) -> Result<()> {
        self.check_xml_size(xml)?;
        let mut state = self.state.lock().await;
        state.xml = xml.to_string();
        self.arm_autosave(&mut state);
        Ok(())
    }

    /// Ensures a diagram version exists for the given message and bookmarks
    /// it. Returns the xml now current. Oversized xml is rejected before any
    /// version is appended.
    pub async fn ensure_version_for_message(
        self: &Arc<Self>,
        message_index: usize,
        xml: &str,
        note: Option<String>,
    ) -> Result<String> {
        self.check_xml_size(xml)?;
        let mut state = self.state.lock().await;
        let current = state
            .history
            .ensure_version_for_message(message_index, xml, note)
            .to_string();
        state.xml = current.clone();
        self.arm_autosave(&mut state);
        Ok(current)
    }

    /// Appends a diagram version without a message bookmark.
    pub async fn append_version(self: &Arc<Self>, xml: &str, note: Option<String>) -> Result<()> {
        self.check_xml_size(xml)?;
        let mut state = self.state.lock().await;
        state.history.append_version(xml, note);
        state.xml = state.history.current_xml().to_string();
        self.arm_autosave(&mut state);
        Ok(())
    }

    /// Restores the version at `index` (clamped) and renders it.
    pub async fn restore_version(self: &Arc<Self>, index: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.history.restore_index(index, self.surface.as_ref())?;
        state.xml = state.history.current_xml().to_string();
        self.arm_autosave(&mut state);
        Ok(())
    }

    /// Steps the version cursor back and renders. Returns `false` when undo
    /// is not possible.
    pub async fn undo(self: &Arc<Self>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let moved = state.history.undo(self.surface.as_ref())?;
        if moved {
            state.xml = state.history.current_xml().to_string();
            self.arm_autosave(&mut state);
        }
        Ok(moved)
    }

    /// Steps the version cursor forward and renders. Returns `false` when
    /// redo is not possible.
    pub async fn redo(self: &Arc<Self>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let moved = state.history.redo(self.surface.as_ref())?;
        if moved {
            state.xml = state.history.current_xml().to_string();
            self.arm_autosave(&mut state);
        }
        Ok(moved)
    }

    /// Invalidates diagram history causally after an edited or regenerated
    /// message.
    pub async fn truncate_versions_after_message(self: &Arc<Self>, message_index: usize) {
        let mut state = self.state.lock().await;
        state.history.truncate_after_message(message_index);
        state.xml = state.history.current_xml().to_string();
        self.arm_autosave(&mut state);
    }

    /// Forces an immediate durable write of the pending in-memory state.
    pub async fn flush_now(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_state(&mut state).await
    }

    /// Best-effort teardown dispatch (tab hidden, page unload). Cancels the
    /// debounce timer and hands the current snapshot to the store's
    /// fire-and-forget path. Never fails and never panics.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        state.scheduler.begin_forced_flush();
        if state.ephemeral || state.active_id.is_empty() {
            state.scheduler.finish_flush(None);
            return;
        }
        let fingerprint = state.fingerprint();
        if state.scheduler.is_clean(&fingerprint) {
            state.scheduler.finish_flush(None);
            return;
        }
        let payload = state.snapshot();
        if let Err(e) = payload.validate(self.config.max_xml_bytes) {
            tracing::debug!("[ConversationManager] teardown snapshot rejected: {}", e);
            state.scheduler.finish_flush(None);
            return;
        }
        self.store
            .save_immediately(&state.active_id, &payload, MetaPatch::touch(Utc::now()));
        state.scheduler.finish_flush(Some(fingerprint));
    }

    /// Lists non-deleted conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationMeta>> {
        self.store.list_conversations().await
    }

    /// Last known conversation list, without I/O.
    pub fn cached_conversations(&self) -> Vec<ConversationMeta> {
        self.store.cached_conversations()
    }

    /// Updates a conversation's title.
    pub async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.store.update_title(id, title).await
    }

    /// Id of the active conversation.
    pub async fn active_conversation_id(&self) -> String {
        self.state.lock().await.active_id.clone()
    }

    /// Version-history state for undo/redo controls.
    pub async fn history_view(&self) -> HistoryView {
        self.state.lock().await.history.view()
    }

    /// Current message list.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.messages.clone()
    }

    /// Current diagram xml.
    pub async fn current_xml(&self) -> String {
        self.state.lock().await.xml.clone()
    }

    /// True when the active conversation could not be persisted and lives
    /// only in memory.
    pub async fn is_ephemeral(&self) -> bool {
        self.state.lock().await.ephemeral
    }

    /// Creates a fresh empty conversation, records it as current, and loads
    /// it into the working state. Storage failure degrades to an
    /// in-memory-only conversation.
    async fn create_fresh(self: &Arc<Self>, state: &mut ManagerState) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let payload = ConversationPayload::empty();
        let created = self
            .store
            .create_conversation(&id, &payload, Utc::now())
            .await;
        state.load(id.clone(), payload, &self.config);
        if created {
            let fingerprint = state.fingerprint();
            state.scheduler.mark_saved(fingerprint);
            self.store.set_current_conversation_id(&id).await?;
        } else {
            state.ephemeral = true;
            tracing::warn!(
                "[ConversationManager] storage rejected conversation {}, continuing in memory only",
                id
            );
        }
        Ok(id)
    }

    /// Forced flush of the working state: cancels the debounce timer and
    /// writes immediately. The state machine returns to idle regardless of
    /// the write's outcome; a clean fingerprint skips the write entirely.
    async fn flush_state(&self, state: &mut ManagerState) -> Result<()> {
        if state.active_id.is_empty() {
            return Ok(());
        }
        state.scheduler.begin_forced_flush();
        if state.ephemeral {
            state.scheduler.finish_flush(None);
            return Ok(());
        }
        let fingerprint = state.fingerprint();
        if state.scheduler.is_clean(&fingerprint) {
            state.scheduler.finish_flush(None);
            return Ok(());
        }
        let payload = state.snapshot();
        if let Err(e) = payload.validate(self.config.max_xml_bytes) {
            state.scheduler.finish_flush(None);
            return Err(e);
        }
        let result = self
            .store
            .save_conversation(&state.active_id, ConversationPatch::full(&payload))
            .await;
        match result {
            Ok(()) => {
                state.scheduler.finish_flush(Some(fingerprint));
                Ok(())
            }
            Err(e) => {
                state.scheduler.finish_flush(None);
                Err(e)
            }
        }
    }

    /// Registers a material change and (re)arms the debounce timer. Spawns a
    /// generation-tagged sleeper; a sleeper superseded by a newer change
    /// wakes, notices its generation is stale, and does nothing.
    fn arm_autosave(self: &Arc<Self>, state: &mut ManagerState) {
        if state.ephemeral {
            return;
        }
        let fingerprint = state.fingerprint();
        let Some(generation) = state.scheduler.note_change(fingerprint, Instant::now()) else {
            return;
        };
        let debounce = state.scheduler.debounce();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            manager.autosave_fire(generation).await;
        });
    }

    /// Timer expiry path of the scheduler.
    async fn autosave_fire(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.scheduler.begin_flush_for(generation) {
            return;
        }
        let payload = state.snapshot();
        if let Err(e) = payload.validate(self.config.max_xml_bytes) {
            tracing::warn!(
                "[ConversationManager] auto-save of {} rejected: {}",
                state.active_id,
                e
            );
            state.scheduler.finish_flush(None);
            return;
        }
        let fingerprint = state.fingerprint();
        let id = state.active_id.clone();
        let result = self
            .store
            .save_conversation(&id, ConversationPatch::full(&payload))
            .await;
        match result {
            Ok(()) => {
                tracing::debug!("[ConversationManager] auto-saved {}", id);
                state.scheduler.finish_flush(Some(fingerprint));
            }
            Err(e) => {
                tracing::warn!("[ConversationManager] auto-save of {} failed: {}", id, e);
                state.scheduler.finish_flush(None);
            }
        }
    }

    /// Renders the working state's xml, clearing the surface when there is
    /// nothing to show.
    fn render_current(&self, state: &ManagerState) -> Result<()> {
        if state.xml.is_empty() {
            self.surface.clear()
        } else {
            self.surface.display(&state.xml, true)
        }
    }

    fn check_xml_size(&self, xml: &str) -> Result<()> {
        if xml.len() > self.config.max_xml_bytes {
            return Err(DrawflowError::validation(format!(
                "diagram xml is {} bytes, exceeding the {} byte ceiling",
                xml.len(),
                self.config.max_xml_bytes
            )));
        }
        Ok(())
    }
}
