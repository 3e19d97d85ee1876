use serde::{Deserialize, Serialize};

use crate::buffer::{PixelAllocator, PixelBuffer};
use crate::error::HistoryError;
use crate::geometry::PixelRect;
use crate::host::LayerHost;

use super::action::Action;
use super::kind::ActionKind;
use super::spare::SpareCache;
use super::LayerId;

/// Selection state saved alongside an event, restored by the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionData {
    pub bounds: PixelRect,
    /// One byte of coverage per pixel of `bounds`, row-major.
    pub mask: Vec<u8>,
}

/// Layer properties saved alongside an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub name: String,
    pub index: usize,
    pub visible: bool,
    pub opacity: f32,
}

/// What the host must do to its view after an event was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerChange {
    Repaint { layer: LayerId, rect: PixelRect },
    Removed { layer: LayerId },
    Inserted { layer: LayerId, rect: PixelRect },
}

/// Which way the event is being applied. Actions are undone last-first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// One user-visible operation: a named group of actions applied together.
#[derive(Debug)]
pub struct Event {
    name: String,
    thumbnail: Option<PixelBuffer>,
    actions: Vec<Action>,
    selection_snapshot: Option<SelectionData>,
    layer_snapshot: Option<LayerMetadata>,
}

impl Event {
    pub fn new(name: impl Into<String>, thumbnail: Option<PixelBuffer>) -> Self {
        Self {
            name: name.into(),
            thumbnail,
            actions: Vec::new(),
            selection_snapshot: None,
            layer_snapshot: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thumbnail(&self) -> Option<&PixelBuffer> {
        self.thumbnail.as_ref()
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// True when every action stored nothing (vacuously true with no actions).
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(Action::is_empty)
    }

    /// The single-action layer-addition case that `undo` leaves to the host.
    pub fn is_single_add_layer(&self) -> bool {
        matches!(self.actions.as_slice(), [only] if *only.kind() == ActionKind::AddLayer)
    }

    pub fn set_selection_snapshot(&mut self, selection: Option<SelectionData>) {
        self.selection_snapshot = selection;
    }

    pub fn selection_snapshot(&self) -> Option<&SelectionData> {
        self.selection_snapshot.as_ref()
    }

    pub fn set_layer_snapshot(&mut self, metadata: Option<LayerMetadata>) {
        self.layer_snapshot = metadata;
    }

    pub fn layer_snapshot(&self) -> Option<&LayerMetadata> {
        self.layer_snapshot.as_ref()
    }

    pub fn memory_bytes(&self) -> usize {
        self.actions.iter().map(Action::memory_bytes).sum::<usize>()
            + self.thumbnail.as_ref().map_or(0, PixelBuffer::memory_bytes)
            + self.selection_snapshot.as_ref().map_or(0, |s| s.mask.len())
    }

    /// Apply every action, or none of them.
    ///
    /// If an action fails, the ones already applied are applied again, which
    /// puts them back where they were, before the error is returned.
    pub(crate) fn apply(
        &mut self,
        direction: Direction,
        host: &mut dyn LayerHost,
        cache: &mut SpareCache,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<Vec<LayerChange>, HistoryError> {
        let order: Vec<usize> = match direction {
            Direction::Redo => (0..self.actions.len()).collect(),
            Direction::Undo => (0..self.actions.len()).rev().collect(),
        };

        let mut changes = Vec::new();
        for (done, &idx) in order.iter().enumerate() {
            let action = &mut self.actions[idx];
            match action.apply(host, cache, alloc) {
                Ok(rect) => {
                    let layer = action.layer_id();
                    let change = match (action.is_structural(), rect) {
                        (true, Some(rect)) => Some(LayerChange::Inserted { layer, rect }),
                        (true, None) => Some(LayerChange::Removed { layer }),
                        (false, Some(rect)) => Some(LayerChange::Repaint { layer, rect }),
                        (false, None) => None,
                    };
                    changes.extend(change);
                }
                Err(e) => {
                    for &undo_idx in order[..done].iter().rev() {
                        if let Err(rollback) = self.actions[undo_idx].apply(host, cache, alloc) {
                            log_err!("history: rolling back '{}' failed: {}", self.name, rollback);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SystemAllocator;
    use crate::error::OutOfMemory;
    use crate::geometry::Rect;
    use crate::history::diff::DiffEngine;
    use crate::host::LayerStack;

    struct NoMemory;

    impl PixelAllocator for NoMemory {
        fn allocate(&mut self, width: u32, height: u32) -> Result<PixelBuffer, OutOfMemory> {
            Err(OutOfMemory { requested_bytes: width as usize * height as usize * 4 })
        }
    }

    #[test]
    fn empty_when_all_actions_are_noops() {
        let mut event = Event::new("Nothing", None);
        assert!(event.is_empty());
        event.add_action(Action::new(0, ActionKind::Noop, Rect::from_min_max(0.0, 0.0, 1.0, 1.0)));
        assert!(event.is_empty());
        event.add_action(Action::new(0, ActionKind::Content, Rect::from_min_max(0.0, 0.0, 1.0, 1.0)));
        assert!(!event.is_empty());
    }

    #[test]
    fn single_add_layer_detection() {
        let rect = Rect::from_min_max(0.0, 0.0, 1.0, 1.0);
        let mut event = Event::new("Add Layer", None);
        event.add_action(Action::new(1, ActionKind::AddLayer, rect));
        assert!(event.is_single_add_layer());
        event.add_action(Action::new(1, ActionKind::Content, rect));
        assert!(!event.is_single_add_layer());

        let mut merge = Event::new("Merge", None);
        merge.add_action(Action::new(1, ActionKind::MergeLayer { merged_layer_id: 2 }, rect));
        assert!(!merge.is_single_add_layer());
    }

    #[test]
    fn failed_action_rolls_back_the_others() {
        let mut stack = LayerStack::new();
        let mut cache = SpareCache::new();
        let mut diff = DiffEngine::with_seed(9);

        let base = PixelBuffer::new_filled(16, 16, 0);
        let painted = stack.push_layer(base.clone());
        cache.replace(painted, base.clone());
        let added_bitmap = PixelBuffer::new_filled(16, 16, 5);
        let added = stack.push_layer(added_bitmap.clone());

        let mut event = Event::new("Paint and add", None);

        stack.layer_bitmap_mut(painted).unwrap().fill_rect(PixelRect::new(0, 0, 16, 16), 3);
        let current = stack.layer_bitmap(painted).unwrap().clone();
        let mut paint = Action::new(painted, ActionKind::Content, Rect::from_pixel_rect(base.bounds()));
        paint.store(&current, &mut cache, &mut diff, &mut SystemAllocator).unwrap();

        let mut add = Action::new(added, ActionKind::AddLayer, Rect::from_pixel_rect(base.bounds()));
        add.store(&added_bitmap, &mut cache, &mut diff, &mut SystemAllocator).unwrap();

        event.add_action(paint);
        event.add_action(add);

        // Undo removes the added layer first, then restores the paint.
        let changes = event.apply(Direction::Undo, &mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(changes[0], LayerChange::Removed { layer: added });
        assert!(matches!(changes[1], LayerChange::Repaint { layer, .. } if layer == painted));
        assert_eq!(stack.layer_bitmap(painted), Some(&base));

        // Redo repaints first, then fails to allocate the reinserted layer.
        let result = event.apply(Direction::Redo, &mut stack, &mut cache, &mut NoMemory);
        assert!(matches!(result, Err(HistoryError::OutOfMemory(_))));
        assert_eq!(stack.layer_bitmap(painted), Some(&base));
        assert_eq!(cache.get(painted), Some(&base));
        assert!(!stack.contains(added));

        let changes = event.apply(Direction::Redo, &mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(stack.layer_bitmap(painted), Some(&current));
        assert_eq!(stack.layer_bitmap(added), Some(&added_bitmap));
    }
}
