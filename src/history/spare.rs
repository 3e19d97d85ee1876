use crate::buffer::PixelBuffer;

use super::LayerId;

/// Per-layer copies of the last committed content, indexed by layer id.
///
/// These are the "old" side of every diff. The table only grows; freeing a
/// layer's entry leaves an empty slot behind.
#[derive(Debug, Default)]
pub struct SpareCache {
    bitmaps: Vec<Option<PixelBuffer>>,
}

impl SpareCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, layer: LayerId) -> &mut Option<PixelBuffer> {
        let idx = layer as usize;
        if idx >= self.bitmaps.len() {
            self.bitmaps.resize_with(idx + 1, || None);
        }
        &mut self.bitmaps[idx]
    }

    /// Store `bitmap` as the committed state of `layer`, returning the previous one.
    pub fn replace(&mut self, layer: LayerId, bitmap: PixelBuffer) -> Option<PixelBuffer> {
        self.slot_mut(layer).replace(bitmap)
    }

    /// Detach the bitmap of `layer`, leaving the slot empty.
    pub fn take(&mut self, layer: LayerId) -> Option<PixelBuffer> {
        self.bitmaps.get_mut(layer as usize).and_then(Option::take)
    }

    pub fn get(&self, layer: LayerId) -> Option<&PixelBuffer> {
        self.bitmaps.get(layer as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, layer: LayerId) -> Option<&mut PixelBuffer> {
        self.bitmaps.get_mut(layer as usize).and_then(Option::as_mut)
    }

    /// Drop every cached bitmap. Capacity for the highest seen id is kept.
    pub fn release_all(&mut self) {
        self.bitmaps.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of slots, i.e. one past the highest layer id seen.
    pub fn capacity(&self) -> usize {
        self.bitmaps.len()
    }

    pub fn memory_bytes(&self) -> usize {
        self.bitmaps.iter().flatten().map(PixelBuffer::memory_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_highest_id_and_never_shrinks() {
        let mut cache = SpareCache::new();
        cache.replace(5, PixelBuffer::new_filled(2, 2, 0));
        assert_eq!(cache.capacity(), 6);
        cache.replace(1, PixelBuffer::new_filled(1, 1, 0));
        assert_eq!(cache.capacity(), 6);
        assert!(cache.take(5).is_some());
        assert!(cache.get(5).is_none());
        assert_eq!(cache.capacity(), 6);
        cache.release_all();
        assert!(cache.get(1).is_none());
        assert_eq!(cache.capacity(), 6);
    }

    #[test]
    fn replace_returns_previous() {
        let mut cache = SpareCache::new();
        assert!(cache.replace(0, PixelBuffer::new_filled(1, 1, 1)).is_none());
        let prev = cache.replace(0, PixelBuffer::new_filled(1, 1, 2)).unwrap();
        assert_eq!(prev.get(0, 0), 1);
        assert_eq!(cache.get(0).unwrap().get(0, 0), 2);
    }
}
