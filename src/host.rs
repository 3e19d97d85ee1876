//! The narrow interface between the history engine and the document's layers.
//!
//! The engine reads post-edit bitmaps during recording and writes restored
//! pixels back during undo/redo. Layer creation and removal on undo/redo of
//! structural changes also go through here.

use crate::buffer::PixelBuffer;
use crate::geometry::PixelRect;
use crate::history::LayerId;

pub trait LayerHost {
    fn layer_bitmap(&self, layer: LayerId) -> Option<&PixelBuffer>;
    fn layer_bitmap_mut(&mut self, layer: LayerId) -> Option<&mut PixelBuffer>;

    /// Put a layer (back) into the document.
    fn insert_layer(&mut self, layer: LayerId, bitmap: PixelBuffer);

    /// Take a layer out of the document.
    fn remove_layer(&mut self, layer: LayerId) -> Option<PixelBuffer>;

    /// Swap in a bitmap of possibly different size.
    fn replace_layer_bitmap(&mut self, layer: LayerId, bitmap: PixelBuffer) -> Option<PixelBuffer> {
        self.layer_bitmap_mut(layer)
            .map(|slot| std::mem::replace(slot, bitmap))
    }

    fn active_bitmap_bounds(&self, layer: LayerId) -> Option<PixelRect> {
        self.layer_bitmap(layer).map(PixelBuffer::bounds)
    }
}

/// Plain in-memory layer list: bitmaps by id plus bottom-to-top order.
#[derive(Debug, Default)]
pub struct LayerStack {
    bitmaps: Vec<Option<PixelBuffer>>,
    order: Vec<LayerId>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a layer on top of the stack and return its id.
    pub fn push_layer(&mut self, bitmap: PixelBuffer) -> LayerId {
        let id = self.bitmaps.len() as LayerId;
        self.bitmaps.push(Some(bitmap));
        self.order.push(id);
        id
    }

    /// Layer ids from bottom to top.
    pub fn order(&self) -> &[LayerId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.layer_bitmap(layer).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &PixelBuffer)> {
        self.order
            .iter()
            .filter_map(|&id| self.layer_bitmap(id).map(|b| (id, b)))
    }
}

impl LayerHost for LayerStack {
    fn layer_bitmap(&self, layer: LayerId) -> Option<&PixelBuffer> {
        self.bitmaps.get(layer as usize).and_then(Option::as_ref)
    }

    fn layer_bitmap_mut(&mut self, layer: LayerId) -> Option<&mut PixelBuffer> {
        self.bitmaps.get_mut(layer as usize).and_then(Option::as_mut)
    }

    fn insert_layer(&mut self, layer: LayerId, bitmap: PixelBuffer) {
        let idx = layer as usize;
        if idx >= self.bitmaps.len() {
            self.bitmaps.resize_with(idx + 1, || None);
        }
        self.bitmaps[idx] = Some(bitmap);
        if !self.order.contains(&layer) {
            // Keep ids ascending, which is creation order.
            let pos = self.order.partition_point(|&id| id < layer);
            self.order.insert(pos, layer);
        }
    }

    fn remove_layer(&mut self, layer: LayerId) -> Option<PixelBuffer> {
        self.order.retain(|&id| id != layer);
        self.bitmaps.get_mut(layer as usize).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_then_insert_restores_position() {
        let mut stack = LayerStack::new();
        let a = stack.push_layer(PixelBuffer::new_filled(1, 1, 0));
        let b = stack.push_layer(PixelBuffer::new_filled(1, 1, 1));
        let c = stack.push_layer(PixelBuffer::new_filled(1, 1, 2));

        let removed = stack.remove_layer(b).unwrap();
        assert_eq!(stack.order(), &[a, c]);
        assert!(!stack.contains(b));

        stack.insert_layer(b, removed);
        assert_eq!(stack.order(), &[a, b, c]);
        assert_eq!(stack.layer_bitmap(b).unwrap().get(0, 0), 1);
    }

    #[test]
    fn replace_bitmap_changes_bounds() {
        let mut stack = LayerStack::new();
        let a = stack.push_layer(PixelBuffer::new_filled(4, 4, 0));
        let old = stack.replace_layer_bitmap(a, PixelBuffer::new_filled(2, 3, 0)).unwrap();
        assert_eq!(old.width(), 4);
        assert_eq!(stack.active_bitmap_bounds(a), Some(PixelRect::from_size(2, 3)));
    }
}
