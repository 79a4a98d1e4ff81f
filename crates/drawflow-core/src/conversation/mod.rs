//! Conversation domain module.
//!
//! This module contains the conversation-related domain models, the storage
//! port, and the lifecycle manager.
//!
//! # Module Structure
//!
//! - `model`: Durable record shapes (`ConversationMeta`, `ConversationPayload`,
//!   `DiagramVersion`) and their partial-update patches
//! - `message`: Chat message types (`MessageRole`, `ChatMessage`)
//! - `repository`: Storage port (`ConversationStore`)
//! - `manager`: Conversation lifecycle management (`ConversationManager`)

mod manager;
mod message;
mod model;
mod repository;

// Re-export public API
pub use manager::ConversationManager;
pub use message::{ChatMessage, MessageRole};
pub use model::{
    ConversationMeta, ConversationPatch, ConversationPayload, DiagramVersion, MetaPatch,
};
pub use repository::ConversationStore;
