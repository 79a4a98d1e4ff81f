//! Conversation domain model.
//!
//! Durable record shapes for conversations: the lightweight listing record,
//! the full payload, and immutable diagram-version snapshots. These are the
//! "pure" models the engine operates on, independent of any storage format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::message::ChatMessage;
use crate::error::{DrawflowError, Result};

/// Lightweight listing record for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
    /// Soft-delete tombstone. Tombstoned conversations stay out of listings
    /// but are kept so the flag can propagate to a remote copy.
    #[serde(default)]
    pub deleted: bool,
}

impl ConversationMeta {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: timestamp,
            updated_at: timestamp,
            title: None,
            deleted: false,
        }
    }

    /// Advances `updated_at`, keeping it monotonically non-decreasing even
    /// if the wall clock stepped backward.
    pub fn touch(&mut self, timestamp: DateTime<Utc>) {
        if timestamp > self.updated_at {
            self.updated_at = timestamp;
        }
    }
}

/// An immutable snapshot of diagram xml at one point in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramVersion {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub xml: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl DiagramVersion {
    pub fn new(xml: impl Into<String>, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            xml: xml.into(),
            note,
        }
    }
}

/// The full durable record for one conversation.
///
/// Owns the message list, the current diagram xml, and the diagram-version
/// history (versions, cursor, message bookmarks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub messages: Vec<ChatMessage>,
    pub xml: String,
    pub diagram_versions: Vec<DiagramVersion>,
    /// Pointer into `diagram_versions`; `-1` means no version yet.
    pub diagram_version_cursor: i64,
    /// Bookmark from message index to version index. Many-to-one: several
    /// messages may point at the same version.
    pub diagram_version_marks: BTreeMap<usize, usize>,
    pub session_id: String,
}

impl ConversationPayload {
    /// The fallback template: empty messages, empty diagram, fresh session id.
    /// Used for new chats and for missing/corrupt records on load.
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            xml: String::new(),
            diagram_versions: Vec::new(),
            diagram_version_cursor: -1,
            diagram_version_marks: BTreeMap::new(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Rejects payloads whose xml exceeds the configured size ceiling.
    /// Oversized xml must never reach durable storage.
    pub fn validate(&self, max_xml_bytes: usize) -> Result<()> {
        if self.xml.len() > max_xml_bytes {
            return Err(DrawflowError::validation(format!(
                "diagram xml is {} bytes, exceeding the {} byte ceiling",
                self.xml.len(),
                max_xml_bytes
            )));
        }
        for version in &self.diagram_versions {
            if version.xml.len() > max_xml_bytes {
                return Err(DrawflowError::validation(format!(
                    "diagram version {} is {} bytes, exceeding the {} byte ceiling",
                    version.id,
                    version.xml.len(),
                    max_xml_bytes
                )));
            }
        }
        Ok(())
    }
}

/// Partial update for a conversation payload. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPatch {
    pub messages: Option<Vec<ChatMessage>>,
    pub xml: Option<String>,
    pub diagram_versions: Option<Vec<DiagramVersion>>,
    pub diagram_version_cursor: Option<i64>,
    pub diagram_version_marks: Option<BTreeMap<usize, usize>>,
    pub session_id: Option<String>,
}

impl ConversationPatch {
    /// A patch carrying the whole payload.
    pub fn full(payload: &ConversationPayload) -> Self {
        Self {
            messages: Some(payload.messages.clone()),
            xml: Some(payload.xml.clone()),
            diagram_versions: Some(payload.diagram_versions.clone()),
            diagram_version_cursor: Some(payload.diagram_version_cursor),
            diagram_version_marks: Some(payload.diagram_version_marks.clone()),
            session_id: Some(payload.session_id.clone()),
        }
    }

    /// Applies the patch onto an existing payload.
    pub fn apply(self, payload: &mut ConversationPayload) {
        if let Some(messages) = self.messages {
            payload.messages = messages;
        }
        if let Some(xml) = self.xml {
            payload.xml = xml;
        }
        if let Some(versions) = self.diagram_versions {
            payload.diagram_versions = versions;
        }
        if let Some(cursor) = self.diagram_version_cursor {
            payload.diagram_version_cursor = cursor;
        }
        if let Some(marks) = self.diagram_version_marks {
            payload.diagram_version_marks = marks;
        }
        if let Some(session_id) = self.session_id {
            payload.session_id = session_id;
        }
    }
}

/// Partial update for a conversation's listing record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaPatch {
    pub title: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: Option<bool>,
}

impl MetaPatch {
    /// A patch that only advances `updated_at`.
    pub fn touch(timestamp: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(timestamp),
            ..Self::default()
        }
    }

    /// Applies the patch onto an existing meta record. `updated_at` stays
    /// monotonically non-decreasing.
    pub fn apply(self, meta: &mut ConversationMeta) {
        if let Some(title) = self.title {
            meta.title = Some(title);
        }
        if let Some(timestamp) = self.updated_at {
            meta.touch(timestamp);
        }
        if let Some(deleted) = self.deleted {
            meta.deleted = deleted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_matches_fallback_template() {
        let payload = ConversationPayload::empty();
        assert!(payload.messages.is_empty());
        assert_eq!(payload.xml, "");
        assert!(payload.diagram_versions.is_empty());
        assert_eq!(payload.diagram_version_cursor, -1);
        assert!(!payload.session_id.is_empty());
    }

    #[test]
    fn oversized_xml_is_rejected() {
        let mut payload = ConversationPayload::empty();
        payload.xml = "x".repeat(1025);

        let err = payload.validate(1024).unwrap_err();
        assert!(err.is_validation());

        payload.xml.truncate(1024);
        assert!(payload.validate(1024).is_ok());
    }

    #[test]
    fn touch_is_monotonic() {
        let now = Utc::now();
        let mut meta = ConversationMeta::new("c1", now);

        let earlier = now - chrono::Duration::seconds(10);
        meta.touch(earlier);
        assert_eq!(meta.updated_at, now);

        let later = now + chrono::Duration::seconds(10);
        meta.touch(later);
        assert_eq!(meta.updated_at, later);
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut payload = ConversationPayload::empty();
        let session_id = payload.session_id.clone();

        ConversationPatch {
            xml: Some("<mxfile>v1</mxfile>".to_string()),
            ..ConversationPatch::default()
        }
        .apply(&mut payload);

        assert_eq!(payload.xml, "<mxfile>v1</mxfile>");
        assert_eq!(payload.session_id, session_id);
    }
}
