//! Remote conversation API client.
//!
//! Wire contract for the cloud store: an idempotent full-snapshot upsert
//! (`push`), a detail fetch (`get_by_id`) and a paged listing (`list_metas`).
//! A record pushed with `deleted: true` is a tombstone. The same push shape
//! is also dispatched fire-and-forget at teardown.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use drawflow_core::config::RemoteConfig;
use drawflow_core::conversation::{ConversationMeta, ConversationPayload};
use drawflow_core::error::{DrawflowError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One record in a full-snapshot upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationUpsert {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ConversationPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationUpsert {
    /// True when this record tombstones the conversation.
    pub fn is_tombstone(&self) -> bool {
        self.deleted == Some(true)
    }
}

/// Upsert request carrying full current snapshots. Because every push
/// transmits the whole payload, two in-flight pushes for one conversation
/// may complete in either order without corrupting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub conversations: Vec<ConversationUpsert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    pub accepted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConversation {
    pub payload: ConversationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPage {
    pub conversations: Vec<ConversationMeta>,
}

/// Remote side of the cloud store.
#[async_trait]
pub trait RemoteConversationApi: Send + Sync {
    /// Idempotent full-snapshot upsert.
    async fn push(&self, request: PushRequest) -> Result<PushAck>;

    /// Fetches one conversation; `Ok(None)` when the remote has no record.
    async fn get_by_id(&self, id: &str) -> Result<Option<RemoteConversation>>;

    /// Paged listing of conversation metas.
    async fn list_metas(&self, limit: usize, offset: usize) -> Result<MetaPage>;

    /// Teardown transport: dispatches a push without awaiting delivery.
    /// Best-effort, at-most-attempted; errors are unobservable by design.
    fn push_detached(&self, request: PushRequest);
}

/// HTTP implementation of the remote contract.
#[derive(Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Adds the bearer header when an API key is configured.
    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            request.header("Authorization", format!("Bearer {}", api_key))
        } else {
            request
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(DrawflowError::network(format!(
            "remote returned {}: {}",
            status, body
        )))
    }
}

#[async_trait]
impl RemoteConversationApi for HttpRemoteApi {
    async fn push(&self, request: PushRequest) -> Result<PushAck> {
        let url = format!("{}/conversations/push", self.base_url);
        let response = self
            .auth_request(self.client.post(&url).timeout(REQUEST_TIMEOUT))
            .json(&request)
            .send()
            .await
            .map_err(|e| DrawflowError::network(format!("push failed: {}", e)))?;
        let response = Self::check_status(response).await?;
        response
            .json::<PushAck>()
            .await
            .map_err(|e| DrawflowError::network(format!("invalid push ack: {}", e)))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<RemoteConversation>> {
        let url = format!("{}/conversations/{}", self.base_url, id);
        let response = self
            .auth_request(self.client.get(&url).timeout(REQUEST_TIMEOUT))
            .send()
            .await
            .map_err(|e| DrawflowError::network(format!("fetch of {} failed: {}", id, e)))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;
        response
            .json::<RemoteConversation>()
            .await
            .map(Some)
            .map_err(|e| DrawflowError::network(format!("invalid conversation body: {}", e)))
    }

    async fn list_metas(&self, limit: usize, offset: usize) -> Result<MetaPage> {
        let url = format!(
            "{}/conversations?limit={}&offset={}",
            self.base_url, limit, offset
        );
        let response = self
            .auth_request(self.client.get(&url).timeout(REQUEST_TIMEOUT))
            .send()
            .await
            .map_err(|e| DrawflowError::network(format!("listing failed: {}", e)))?;
        let response = Self::check_status(response).await?;
        response
            .json::<MetaPage>()
            .await
            .map_err(|e| DrawflowError::network(format!("invalid listing body: {}", e)))
    }

    fn push_detached(&self, request: PushRequest) {
        // The unload path may outlive the caller; the send is spawned and
        // never awaited. Without a runtime the push is dropped silently.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("[RemoteApi] no runtime for detached push, dropping");
            return;
        };
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let url = format!("{}/conversations/push", self.base_url);
        handle.spawn(async move {
            let mut builder = client.post(&url).timeout(REQUEST_TIMEOUT).json(&request);
            if let Some(api_key) = &api_key {
                builder = builder.header("Authorization", format!("Bearer {}", api_key));
            }
            match builder.send().await {
                Ok(response) => {
                    tracing::debug!("[RemoteApi] detached push status {}", response.status())
                }
                Err(e) => tracing::debug!("[RemoteApi] detached push failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_serializes_without_payload() {
        let upsert = ConversationUpsert {
            id: "c1".to_string(),
            payload: None,
            deleted: Some(true),
            title: None,
            created_at: None,
            updated_at: Some(Utc::now()),
        };
        assert!(upsert.is_tombstone());

        let json = serde_json::to_value(&upsert).unwrap();
        assert_eq!(json["deleted"], serde_json::json!(true));
        assert!(json.get("payload").is_none());
        assert!(json.get("title").is_none());
    }

    #[test]
    fn full_upsert_round_trips() {
        let upsert = ConversationUpsert {
            id: "c1".to_string(),
            payload: Some(ConversationPayload::empty()),
            deleted: None,
            title: Some("Topology".to_string()),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };

        let json = serde_json::to_string(&PushRequest {
            conversations: vec![upsert.clone()],
        })
        .unwrap();
        let parsed: PushRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.conversations.len(), 1);
        assert_eq!(parsed.conversations[0].id, "c1");
        assert!(!parsed.conversations[0].is_tombstone());
        assert_eq!(parsed.conversations[0].title.as_deref(), Some("Topology"));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let api = HttpRemoteApi::new(&RemoteConfig {
            base_url: "https://sync.example.com/".to_string(),
            api_key: None,
        });
        assert_eq!(api.base_url, "https://sync.example.com");
    }
}
