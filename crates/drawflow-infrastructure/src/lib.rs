//! Drawflow persistence engine infrastructure.
//!
//! Backend implementations of the `drawflow-core` ports: the local JSON-file
//! store, the in-memory store, the remote HTTP client, the durable sync
//! outbox, and the cloud store composing them. Plus path resolution, config
//! loading and engine assembly.

pub mod bootstrap;
pub mod cloud_store;
pub mod config_service;
pub mod local_store;
pub mod memory_store;
pub mod outbox;
pub mod paths;
pub mod remote;

pub use bootstrap::build_store;
pub use cloud_store::CloudConversationStore;
pub use local_store::LocalConversationStore;
pub use memory_store::MemoryConversationStore;
pub use outbox::{OutboxEntry, SyncOutbox};
pub use paths::DrawflowPaths;
pub use remote::{
    ConversationUpsert, HttpRemoteApi, MetaPage, PushAck, PushRequest, RemoteConversation,
    RemoteConversationApi,
};
