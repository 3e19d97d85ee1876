use crate::buffer::{PixelAllocator, PixelBuffer};
use crate::error::HistoryError;
use crate::geometry::{PixelRect, Rect};
use crate::host::LayerHost;

use super::diff::{DiffEngine, DiffRegion};
use super::kind::ActionKind;
use super::spare::SpareCache;
use super::LayerId;

/// One recorded change to exactly one layer.
///
/// `store` runs once, right after the edit. Every `apply` afterwards flips
/// the layer between its before and after states, so undo and redo are the
/// same call.
#[derive(Debug)]
pub struct Action {
    layer_id: LayerId,
    kind: ActionKind,
    requested_rect: Rect,
    bounding_rect: PixelRect,
    regions: Vec<DiffRegion>,
    /// Whole bitmap owned while the layer is detached from the document
    /// (structural kinds), or the other-sized bitmap of a resizing manipulator.
    held: Option<PixelBuffer>,
    size_changed: bool,
}

impl Action {
    pub fn new(layer_id: LayerId, kind: ActionKind, bounding_rect: Rect) -> Self {
        Self {
            layer_id,
            kind,
            requested_rect: bounding_rect,
            bounding_rect: PixelRect::default(),
            regions: Vec::new(),
            held: None,
            size_changed: false,
        }
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// Rectangle covered by the stored change, known after `store`.
    pub fn bounding_rect(&self) -> PixelRect {
        self.bounding_rect
    }

    pub fn regions(&self) -> &[DiffRegion] {
        &self.regions
    }

    pub fn size_changed(&self) -> bool {
        self.size_changed
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ActionKind::Noop
    }

    pub fn is_structural(&self) -> bool {
        self.kind.is_structural()
    }

    pub fn memory_bytes(&self) -> usize {
        self.regions.iter().map(DiffRegion::memory_bytes).sum::<usize>()
            + self.held.as_ref().map_or(0, PixelBuffer::memory_bytes)
    }

    /// Capture the transition from the cached committed state of the layer
    /// to `current`, leaving the cache holding `current`.
    ///
    /// A failed store leaves the cache as it was, so it can be retried.
    pub fn store(
        &mut self,
        current: &PixelBuffer,
        cache: &mut SpareCache,
        diff: &mut DiffEngine,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<(), HistoryError> {
        match self.kind {
            ActionKind::Noop => Ok(()),
            ActionKind::AddLayer => {
                let copy = current.try_clone_in(alloc)?;
                cache.replace(self.layer_id, copy);
                self.bounding_rect = current.bounds();
                Ok(())
            }
            ActionKind::DeleteLayer => {
                let bitmap = match cache.take(self.layer_id) {
                    Some(b) => b,
                    None => current.try_clone_in(alloc)?,
                };
                self.bounding_rect = bitmap.bounds();
                self.held = Some(bitmap);
                Ok(())
            }
            ActionKind::Manipulator { .. } => {
                let old = cache
                    .get(self.layer_id)
                    .ok_or(HistoryError::UnregisteredLayer(self.layer_id))?;
                if old.bounds() == current.bounds() {
                    return self.store_content(current, cache, diff, alloc);
                }
                // Offsets are not comparable across sizes: keep the whole old bitmap.
                let copy = current.try_clone_in(alloc)?;
                let old_bounds = old.bounds();
                self.held = cache.replace(self.layer_id, copy);
                self.bounding_rect = old_bounds.union(&current.bounds());
                self.size_changed = true;
                Ok(())
            }
            ActionKind::Content
            | ActionKind::ClearLayer
            | ActionKind::MergeLayer { .. }
            | ActionKind::ToolStroke { .. } => self.store_content(current, cache, diff, alloc),
        }
    }

    fn store_content(
        &mut self,
        current: &PixelBuffer,
        cache: &mut SpareCache,
        diff: &mut DiffEngine,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<(), HistoryError> {
        let old = cache
            .get_mut(self.layer_id)
            .ok_or(HistoryError::UnregisteredLayer(self.layer_id))?;
        self.regions = diff.store_diff(old, current, self.requested_rect, alloc)?;
        if self.regions.is_empty() {
            self.kind = ActionKind::Noop;
            return Ok(());
        }
        self.bounding_rect = self
            .regions
            .iter()
            .fold(PixelRect::default(), |acc, r| acc.union(&r.rect()));
        Ok(())
    }

    /// Bring the cached state of the layer in line with `current` after a
    /// recording was given up, so later diffs start from the right pixels.
    /// Only same-sized bitmaps are synced, which needs no allocation.
    pub(crate) fn resync_spare(layer: LayerId, current: &PixelBuffer, cache: &mut SpareCache) -> bool {
        match cache.get_mut(layer) {
            Some(spare) if spare.bounds() == current.bounds() => {
                spare.pixels_mut().copy_from_slice(current.pixels());
                true
            }
            _ => false,
        }
    }

    /// Flip the layer to the other recorded state.
    ///
    /// Returns the changed rectangle. For structural kinds `None` means the
    /// layer was removed from the document and `Some` that it was inserted.
    /// Allocation happens before anything is mutated, so a failed apply can
    /// be retried.
    pub fn apply(
        &mut self,
        host: &mut dyn LayerHost,
        cache: &mut SpareCache,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<Option<PixelRect>, HistoryError> {
        let layer = self.layer_id;
        match self.kind {
            ActionKind::Noop => Ok(None),
            ActionKind::AddLayer | ActionKind::DeleteLayer => match self.held.take() {
                // Layer is detached: put it back.
                Some(bitmap) => {
                    let copy = match bitmap.try_clone_in(alloc) {
                        Ok(copy) => copy,
                        Err(e) => {
                            self.held = Some(bitmap);
                            return Err(e.into());
                        }
                    };
                    let bounds = bitmap.bounds();
                    host.insert_layer(layer, copy);
                    cache.replace(layer, bitmap);
                    Ok(Some(bounds))
                }
                // Layer is present: detach it.
                None => {
                    let bitmap = cache.take(layer).ok_or(HistoryError::UnregisteredLayer(layer))?;
                    host.remove_layer(layer);
                    self.held = Some(bitmap);
                    Ok(None)
                }
            },
            ActionKind::Manipulator { .. } if self.size_changed => {
                if host.layer_bitmap(layer).is_none() {
                    return Err(HistoryError::MissingLayer(layer));
                }
                let Some(incoming) = self.held.take() else {
                    return Ok(None);
                };
                let live = match incoming.try_clone_in(alloc) {
                    Ok(copy) => copy,
                    Err(e) => {
                        self.held = Some(incoming);
                        return Err(e.into());
                    }
                };
                let outgoing = cache.replace(layer, incoming);
                let outgoing_bounds = outgoing.as_ref().map_or(PixelRect::default(), PixelBuffer::bounds);
                host.replace_layer_bitmap(layer, live);
                self.held = outgoing;
                Ok(Some(outgoing_bounds))
            }
            _ => {
                let live = host.layer_bitmap_mut(layer).ok_or(HistoryError::MissingLayer(layer))?;
                let shadow = cache.get_mut(layer).ok_or(HistoryError::UnregisteredLayer(layer))?;
                Ok(DiffEngine::restore(live, shadow, &mut self.regions))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SystemAllocator;
    use crate::history::kind::{ManipulatorSettings, ManipulatorType};
    use crate::host::LayerStack;

    fn setup(width: u32, height: u32, value: u32) -> (LayerStack, SpareCache, LayerId) {
        let mut stack = LayerStack::new();
        let mut cache = SpareCache::new();
        let bitmap = PixelBuffer::new_filled(width, height, value);
        cache.replace(0, bitmap.clone());
        let id = stack.push_layer(bitmap);
        (stack, cache, id)
    }

    fn whole(w: u32, h: u32) -> Rect {
        Rect::from_pixel_rect(PixelRect::from_size(w, h))
    }

    #[test]
    fn content_undo_redo() {
        let (mut stack, mut cache, id) = setup(40, 40, 0);
        stack.layer_bitmap_mut(id).unwrap().fill_rect(PixelRect::new(3, 3, 5, 5), 4);
        let edited = stack.layer_bitmap(id).unwrap().clone();

        let mut diff = DiffEngine::with_seed(11);
        let mut action = Action::new(id, ActionKind::Content, whole(40, 40));
        action.store(&edited, &mut cache, &mut diff, &mut SystemAllocator).unwrap();
        assert!(!action.is_empty());
        assert!(action.bounding_rect().contains_rect(&PixelRect::new(3, 3, 5, 5)));
        assert_eq!(cache.get(id), Some(&edited));

        let rect = action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert!(rect.is_some());
        assert!(stack.layer_bitmap(id).unwrap().pixels().iter().all(|&p| p == 0));
        assert_eq!(cache.get(id), stack.layer_bitmap(id));

        action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(stack.layer_bitmap(id), Some(&edited));
        assert_eq!(cache.get(id), Some(&edited));
    }

    #[test]
    fn unchanged_content_degrades_to_noop() {
        let (stack, mut cache, id) = setup(20, 20, 1);
        let current = stack.layer_bitmap(id).unwrap().clone();
        let mut action = Action::new(id, ActionKind::ToolStroke { script: Default::default() }, whole(20, 20));
        action
            .store(&current, &mut cache, &mut DiffEngine::with_seed(1), &mut SystemAllocator)
            .unwrap();
        assert!(action.is_empty());
        assert_eq!(action.memory_bytes(), 0);
    }

    #[test]
    fn unregistered_layer_is_reported() {
        let mut cache = SpareCache::new();
        let current = PixelBuffer::new_filled(4, 4, 0);
        let mut action = Action::new(3, ActionKind::Content, whole(4, 4));
        let err = action
            .store(&current, &mut cache, &mut DiffEngine::with_seed(1), &mut SystemAllocator)
            .unwrap_err();
        assert!(matches!(err, HistoryError::UnregisteredLayer(3)));
    }

    #[test]
    fn add_layer_detaches_and_reattaches() {
        let mut stack = LayerStack::new();
        let mut cache = SpareCache::new();
        let bitmap = PixelBuffer::new_filled(6, 6, 7);
        let id = stack.push_layer(bitmap.clone());

        let mut action = Action::new(id, ActionKind::AddLayer, whole(6, 6));
        action
            .store(&bitmap, &mut cache, &mut DiffEngine::with_seed(1), &mut SystemAllocator)
            .unwrap();
        assert_eq!(cache.get(id), Some(&bitmap));

        assert_eq!(action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap(), None);
        assert!(!stack.contains(id));
        assert!(cache.get(id).is_none());

        let rect = action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(rect, Some(PixelRect::from_size(6, 6)));
        assert_eq!(stack.layer_bitmap(id), Some(&bitmap));
        assert_eq!(cache.get(id), Some(&bitmap));
    }

    #[test]
    fn delete_layer_mirrors_add() {
        let (mut stack, mut cache, id) = setup(5, 5, 2);
        let bitmap = stack.remove_layer(id).unwrap();

        let mut action = Action::new(id, ActionKind::DeleteLayer, whole(5, 5));
        action
            .store(&bitmap, &mut cache, &mut DiffEngine::with_seed(1), &mut SystemAllocator)
            .unwrap();
        assert!(cache.get(id).is_none());

        let rect = action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(rect, Some(PixelRect::from_size(5, 5)));
        assert_eq!(stack.layer_bitmap(id), Some(&bitmap));

        assert_eq!(action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap(), None);
        assert!(!stack.contains(id));
    }

    #[test]
    fn resizing_manipulator_swaps_whole_bitmaps() {
        let (mut stack, mut cache, id) = setup(8, 8, 1);
        let cropped = PixelBuffer::new_filled(4, 3, 1);
        stack.replace_layer_bitmap(id, cropped.clone());

        let kind = ActionKind::Manipulator {
            settings: ManipulatorSettings::default(),
            manipulator_type: ManipulatorType::Crop,
            add_on_id: None,
        };
        let mut action = Action::new(id, kind, whole(8, 8));
        action
            .store(&cropped, &mut cache, &mut DiffEngine::with_seed(1), &mut SystemAllocator)
            .unwrap();
        assert!(action.size_changed());
        assert_eq!(cache.get(id), Some(&cropped));

        // Each flip reports the bounds of the bitmap it swapped out.
        let rect = action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(rect, Some(PixelRect::from_size(4, 3)));
        assert_eq!(stack.active_bitmap_bounds(id), Some(PixelRect::from_size(8, 8)));
        assert_eq!(cache.get(id), stack.layer_bitmap(id));

        let rect = action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(rect, Some(PixelRect::from_size(8, 8)));
        assert_eq!(stack.layer_bitmap(id), Some(&cropped));
        assert_eq!(cache.get(id), Some(&cropped));
    }

    #[test]
    fn same_size_manipulator_diffs_partially() {
        let (mut stack, mut cache, id) = setup(32, 32, 0);
        stack.layer_bitmap_mut(id).unwrap().fill_rect(PixelRect::new(0, 0, 2, 2), 9);
        let current = stack.layer_bitmap(id).unwrap().clone();
        let kind = ActionKind::Manipulator {
            settings: ManipulatorSettings::default(),
            manipulator_type: ManipulatorType::AddOn,
            add_on_id: Some(4),
        };
        let mut action = Action::new(id, kind, whole(32, 32));
        action
            .store(&current, &mut cache, &mut DiffEngine::with_seed(2), &mut SystemAllocator)
            .unwrap();
        assert!(!action.size_changed());
        assert!(!action.regions().is_empty());
        action.apply(&mut stack, &mut cache, &mut SystemAllocator).unwrap();
        assert_eq!(stack.layer_bitmap(id).unwrap().get(1, 1), 0);
    }
}
