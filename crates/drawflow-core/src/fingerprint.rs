//! Cheap structural change detection.
//!
//! A fingerprint is a proxy value computed before every save decision. If it
//! equals the last-saved fingerprint, the save is skipped: no timer, no
//! write. The xml contribution is boundary-based (length plus head/tail
//! slices), not a full content hash, so a change confined to the interior of
//! a large blob while length and boundaries stay identical can be missed.
//! That is accepted: suppression only exists to drop obviously redundant
//! writes, and any missed change is still persisted by the next qualifying
//! change or by a forced flush.

use std::hash::{Hash, Hasher};

use crate::conversation::ConversationPayload;

/// Number of bytes sampled from each end of the xml.
const BOUNDARY_BYTES: usize = 256;

/// Structural digest of a conversation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFingerprint {
    message_count: usize,
    xml_len: usize,
    xml_boundary: u64,
    version_count: usize,
    cursor: i64,
}

impl ChangeFingerprint {
    /// Computes the fingerprint of a payload.
    pub fn of(payload: &ConversationPayload) -> Self {
        Self::of_parts(
            payload.messages.len(),
            &payload.xml,
            payload.diagram_versions.len(),
            payload.diagram_version_cursor,
        )
    }

    /// Computes the fingerprint from the material parts directly, avoiding a
    /// payload clone for callers that hold them separately.
    pub fn of_parts(message_count: usize, xml: &str, version_count: usize, cursor: i64) -> Self {
        Self {
            message_count,
            xml_len: xml.len(),
            xml_boundary: boundary_digest(xml),
            version_count,
            cursor,
        }
    }
}

/// Hashes the first and last [`BOUNDARY_BYTES`] of the string.
fn boundary_digest(xml: &str) -> u64 {
    let bytes = xml.as_bytes();
    let head = &bytes[..bytes.len().min(BOUNDARY_BYTES)];
    let tail = &bytes[bytes.len().saturating_sub(BOUNDARY_BYTES)..];

    let mut hasher = std::hash::DefaultHasher::new();
    head.hash(&mut hasher);
    tail.hash(&mut hasher);
    hasher.finish()
}
