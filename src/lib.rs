//! paintundo: a memory-bounded undo/redo engine for layered raster images.
//!
//! Edits are recorded as [`history::Event`]s in a per-document
//! [`history::Queue`]. Only changed pixel regions are kept, found by diffing
//! each layer against a cached copy of its last committed state.

#![allow(clippy::large_enum_variant)]

#[macro_use]
pub mod logger;

pub mod buffer;
pub mod cli;
pub mod document;
pub mod error;
pub mod geometry;
pub mod history;
pub mod host;
pub mod settings;

pub use buffer::{PixelAllocator, PixelBuffer, SystemAllocator};
pub use document::{Document, DocumentRegistry};
pub use error::{HistoryError, NotFound, OutOfMemory};
pub use geometry::{PixelRect, Rect};
pub use host::{LayerHost, LayerStack};
pub use settings::HistorySettings;
