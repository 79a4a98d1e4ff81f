//! Linear diagram-version history with message bookmarks.
//!
//! A conversation owns one history: an ordered list of immutable xml
//! snapshots, a cursor naming the currently displayed version, and a
//! many-to-one bookmark map from message index to version index. History is
//! strictly linear; producing new content from a non-tail cursor discards
//! everything after the cursor (branch overwrite), it never forks.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::conversation::DiagramVersion;
use crate::error::Result;
use crate::surface::DiagramSurface;

/// Cursor/undo/redo snapshot handed to UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryView {
    pub versions: Vec<DiagramVersion>,
    pub cursor: i64,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Linear, cursor-addressed list of diagram snapshots.
///
/// Invariants, restored on hydration and preserved by every mutation:
/// - `-1 <= cursor <= versions.len() - 1` (`-1` = empty diagram)
/// - every bookmark value indexes into `versions`
/// - the list never exceeds `max_versions`; on overflow the oldest entry is
///   evicted and bookmarks/cursor shift down with it
#[derive(Debug, Clone)]
pub struct DiagramVersionHistory {
    versions: Vec<DiagramVersion>,
    cursor: i64,
    marks: BTreeMap<usize, usize>,
    max_versions: usize,
}

impl DiagramVersionHistory {
    /// Creates an empty history.
    pub fn new(max_versions: usize) -> Self {
        Self {
            versions: Vec::new(),
            cursor: -1,
            marks: BTreeMap::new(),
            max_versions: max_versions.max(1),
        }
    }

    /// Hydrates a history from stored payload fields, repairing any cursor
    /// or bookmark that fell out of bounds in the stored record.
    pub fn from_parts(
        versions: Vec<DiagramVersion>,
        cursor: i64,
        marks: BTreeMap<usize, usize>,
        max_versions: usize,
    ) -> Self {
        let mut history = Self {
            versions,
            cursor,
            marks,
            max_versions: max_versions.max(1),
        };
        let len = history.versions.len() as i64;
        history.cursor = history.cursor.clamp(-1, len - 1);
        history.marks.retain(|_, v| (*v as i64) < len);
        history.evict_over_cap();
        history
    }

    /// Decomposes the history back into payload fields.
    pub fn into_parts(self) -> (Vec<DiagramVersion>, i64, BTreeMap<usize, usize>) {
        (self.versions, self.cursor, self.marks)
    }

    pub fn versions(&self) -> &[DiagramVersion] {
        &self.versions
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn marks(&self) -> &BTreeMap<usize, usize> {
        &self.marks
    }

    /// The version the cursor points at, if any.
    pub fn current_version(&self) -> Option<&DiagramVersion> {
        if self.cursor < 0 {
            None
        } else {
            self.versions.get(self.cursor as usize)
        }
    }

    /// The xml the cursor points at; empty string when no version exists.
    pub fn current_xml(&self) -> &str {
        self.current_version().map(|v| v.xml.as_str()).unwrap_or("")
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor >= 0 && self.cursor < self.versions.len() as i64 - 1
    }

    pub fn view(&self) -> HistoryView {
        HistoryView {
            versions: self.versions.clone(),
            cursor: self.cursor,
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }

    /// Ensures a version exists for the given message and bookmarks it.
    ///
    /// Identical xml at the cursor appends nothing; the bookmark is pointed
    /// at the cursor, so repeating the call is a no-op on the list. New xml
    /// from a non-tail cursor discards everything after the cursor first,
    /// then appends. Bookmarks left pointing at discarded versions are
    /// cleared, not remapped.
    ///
    /// Returns the xml now current.
    pub fn ensure_version_for_message(
        &mut self,
        message_index: usize,
        xml: &str,
        note: Option<String>,
    ) -> &str {
        self.push_version(xml, note);
        if self.cursor >= 0 {
            self.marks.insert(message_index, self.cursor as usize);
        }
        self.current_xml()
    }

    /// Same append/truncate logic as [`Self::ensure_version_for_message`],
    /// without a bookmark. No-op when `xml` equals the version at the cursor.
    pub fn append_version(&mut self, xml: &str, note: Option<String>) {
        self.push_version(xml, note);
    }

    /// Restores a version: clamps `index` into `[-1, len-1]`, renders it
    /// through the surface (`clear` for `-1`), moves the cursor. Never
    /// mutates the list.
    pub fn restore_index(&mut self, index: i64, surface: &dyn DiagramSurface) -> Result<()> {
        let index = index.clamp(-1, self.versions.len() as i64 - 1);
        if index < 0 {
            surface.clear()?;
        } else {
            surface.display(&self.versions[index as usize].xml, true)?;
        }
        self.cursor = index;
        Ok(())
    }

    /// Moves the cursor back one version. Returns `false` when undo is not
    /// possible.
    pub fn undo(&mut self, surface: &dyn DiagramSurface) -> Result<bool> {
        if !self.can_undo() {
            return Ok(false);
        }
        self.restore_index(self.cursor - 1, surface)?;
        Ok(true)
    }

    /// Moves the cursor forward one version. Returns `false` when redo is
    /// not possible.
    pub fn redo(&mut self, surface: &dyn DiagramSurface) -> Result<bool> {
        if !self.can_redo() {
            return Ok(false);
        }
        self.restore_index(self.cursor + 1, surface)?;
        Ok(true)
    }

    /// Cuts the history back to the version bookmarked by `message_index`.
    ///
    /// Used when an earlier message is edited or regenerated: everything
    /// causally after it is invalidated. Bookmarks whose version index falls
    /// outside the truncated range are dropped; the cursor is clamped. A
    /// message without a bookmark leaves the history untouched.
    pub fn truncate_after_message(&mut self, message_index: usize) {
        let Some(&version_index) = self.marks.get(&message_index) else {
            tracing::debug!(
                "[VersionHistory] no bookmark for message {}, nothing to truncate",
                message_index
            );
            return;
        };
        let keep = version_index + 1;
        if keep < self.versions.len() {
            self.versions.truncate(keep);
            self.marks.retain(|_, v| *v < keep);
        }
        self.cursor = self.cursor.min(keep as i64 - 1);
    }

    /// Appends `xml` unless it equals the version at the cursor, truncating
    /// any redo tail first. Returns whether a version was appended.
    fn push_version(&mut self, xml: &str, note: Option<String>) -> bool {
        if let Some(current) = self.current_version()
            && current.xml == xml
        {
            return false;
        }

        // Branch overwrite: the user undid and is producing new content.
        let keep = (self.cursor + 1) as usize;
        if keep < self.versions.len() {
            self.versions.truncate(keep);
            self.marks.retain(|_, v| *v < keep);
        }

        self.versions.push(DiagramVersion::new(xml, note));
        self.cursor = self.versions.len() as i64 - 1;
        self.evict_over_cap();
        true
    }

    /// Evicts oldest versions past the cap, shifting bookmarks and cursor
    /// down with them. Bookmarks pointing at an evicted version are dropped.
    fn evict_over_cap(&mut self) {
        while self.versions.len() > self.max_versions {
            self.versions.remove(0);
            self.cursor = (self.cursor - 1).max(-1);
            let marks = std::mem::take(&mut self.marks);
            self.marks = marks
                .into_iter()
                .filter_map(|(message, version)| version.checked_sub(1).map(|v| (message, v)))
                .collect();
        }
    }
}
