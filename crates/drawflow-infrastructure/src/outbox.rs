//! Durable sync outbox.
//!
//! Cloud-mode writes enqueue here after the optimistic cache update; a
//! background worker drains entries to the remote with exponential backoff.
//! The queue holds at most one entry per conversation: every push transmits
//! the full current snapshot, so a newer enqueue supersedes an older one
//! instead of queueing behind it. The queue survives restarts via a small
//! JSON document next to the conversation files.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// One pending remote push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub conversation_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Persistent, coalescing queue of pending remote pushes.
pub struct SyncOutbox {
    path: PathBuf,
    entries: Mutex<Vec<OutboxEntry>>,
    notify: Notify,
    max_attempts: u32,
    backoff_base: Duration,
}

impl SyncOutbox {
    /// Opens the outbox at `path`, restoring entries persisted by a previous
    /// session. A missing or corrupt document starts empty.
    pub fn load(path: PathBuf, max_attempts: u32) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    tracing::warn!("[SyncOutbox] corrupt outbox at {:?}: {}", path, e);
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
            backoff_base: BACKOFF_BASE,
        }
    }

    /// Overrides the backoff base interval.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Enqueues a push for a conversation, superseding any entry already
    /// pending for it, and wakes the drain worker.
    pub fn enqueue(&self, conversation_id: &str) {
        {
            let mut entries = self.entries.lock().unwrap();
            match entries
                .iter_mut()
                .find(|entry| entry.conversation_id == conversation_id)
            {
                Some(entry) => {
                    entry.enqueued_at = Utc::now();
                    entry.attempts = 0;
                }
                None => entries.push(OutboxEntry {
                    conversation_id: conversation_id.to_string(),
                    enqueued_at: Utc::now(),
                    attempts: 0,
                }),
            }
            self.persist(&entries);
        }
        self.notify.notify_one();
    }

    /// Oldest pending entry, if any.
    pub fn next_entry(&self) -> Option<OutboxEntry> {
        self.entries.lock().unwrap().first().cloned()
    }

    /// Removes an entry after a successful push.
    pub fn complete(&self, conversation_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|entry| entry.conversation_id != conversation_id);
        self.persist(&entries);
    }

    /// Records a failed push. Returns the backoff to sleep before the next
    /// attempt, or `None` when the entry exhausted its attempts and was
    /// dropped (the next qualifying change re-enqueues it).
    pub fn record_failure(&self, conversation_id: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().unwrap();
        let Some(position) = entries
            .iter()
            .position(|entry| entry.conversation_id == conversation_id)
        else {
            return None;
        };
        entries[position].attempts += 1;
        let attempts = entries[position].attempts;
        if attempts >= self.max_attempts {
            tracing::warn!(
                "[SyncOutbox] giving up on {} after {} attempts",
                conversation_id,
                attempts
            );
            entries.remove(position);
            self.persist(&entries);
            return None;
        }
        self.persist(&entries);
        Some(self.backoff(attempts))
    }

    /// True when a push is pending for the conversation (its local state is
    /// ahead of the remote).
    pub fn pending_for(&self, conversation_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.conversation_id == conversation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Waits until a new entry is enqueued.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Exponential backoff for the given attempt count, capped.
    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32 << attempts.saturating_sub(1).min(16);
        (self.backoff_base * factor).min(BACKOFF_CAP)
    }

    fn persist(&self, entries: &[OutboxEntry]) {
        match serde_json::to_string_pretty(entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("[SyncOutbox] failed to persist outbox: {}", e);
                }
            }
            Err(e) => tracing::warn!("[SyncOutbox] failed to serialize outbox: {}", e),
        }
    }
}
