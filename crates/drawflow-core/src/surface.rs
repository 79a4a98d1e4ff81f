//! Rendering surface port.
//!
//! The engine never renders diagrams itself; restoring a version hands the
//! xml to an external surface through this trait.

use crate::error::Result;

/// External diagram-rendering surface.
///
/// Implemented by the UI layer; the engine calls it when a version is
/// restored (undo/redo/explicit restore) or when a conversation without a
/// diagram becomes active.
pub trait DiagramSurface: Send + Sync {
    /// Pushes an xml string into the rendering surface.
    ///
    /// `skip_validation` is set for xml that already passed validation when
    /// it was first accepted into the version history.
    fn display(&self, xml: &str, skip_validation: bool) -> Result<()>;

    /// Clears the surface (no version to show).
    fn clear(&self) -> Result<()>;
}

/// Surface that drops every call. Used where rendering is irrelevant
/// (headless flushing, tests that only inspect state).
#[derive(Debug, Default)]
pub struct NullSurface;

impl DiagramSurface for NullSurface {
    fn display(&self, _xml: &str, _skip_validation: bool) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}
