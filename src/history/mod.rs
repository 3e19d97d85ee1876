//! Undo/redo log for layered bitmaps.
//!
//! A [`Queue`] holds the history of one document as a list of [`Event`]s,
//! each grouping the [`Action`]s of one user-visible operation. Actions store
//! only the pixel regions that changed, found by the [`DiffEngine`] against
//! the queue's cached copy of each layer's last committed state.

pub mod action;
pub mod diff;
pub mod event;
pub mod kind;
pub mod queue;
pub mod spare;

/// Small, dense layer identifier assigned by the host.
pub type LayerId = u32;

pub use action::Action;
pub use diff::{DiffEngine, DiffRegion};
pub use event::{Direction, Event, LayerChange, LayerMetadata, SelectionData};
pub use kind::{ActionKind, ManipulatorSettings, ManipulatorType, ToolScript};
pub use queue::{DepthLimit, EventHandle, HistoryShortened, InsertMode, Queue, StepSummary};
pub use spare::SpareCache;
