// ============================================================================
// DIFF ENGINE - minimal changed-region capture for layer bitmaps
// ============================================================================
//
// `store_diff` compares the committed ("old") bitmap of a layer with its
// post-edit ("current") bitmap and keeps only the rectangles that changed.
// Large areas are classified by sampling a handful of random pixels; areas
// that look only slightly different are split into quadrants and examined
// again, until they are small enough to compare exhaustively.
//
// `restore` swaps the stored pixels with the live ones, so calling it twice
// returns everything to where it started. The same region list serves both
// undo and redo.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::buffer::{PixelAllocator, PixelBuffer};
use crate::error::OutOfMemory;
use crate::geometry::{PixelRect, Rect};

/// Areas narrower or shorter than this are compared pixel by pixel.
pub const EXHAUSTIVE_LIMIT: u32 = 16;
/// Number of random pixels sampled to classify a large area.
pub const SAMPLE_COUNT: usize = 10;
/// Fraction of differing samples at which an area is captured whole.
pub const GREAT_DIFFERENCE_FRACTION: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Difference {
    None,
    Slight,
    Great,
}

/// A changed rectangle and the pixels it held before the change.
pub struct DiffRegion {
    rect: PixelRect,
    snapshot: PixelBuffer,
}

impl DiffRegion {
    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    pub fn memory_bytes(&self) -> usize {
        self.snapshot.memory_bytes()
    }

    /// Copy `old` pixels of `area` into fresh storage, then commit the
    /// `current` pixels into `old` over the same area.
    fn capture(
        old: &mut PixelBuffer,
        current: &PixelBuffer,
        area: PixelRect,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<Self, OutOfMemory> {
        let mut snapshot = alloc.allocate(area.width, area.height)?;
        for (row, y) in (area.y..area.bottom()).enumerate() {
            let row = row as u32;
            snapshot
                .span_mut(row, 0, area.width)
                .copy_from_slice(old.span(y, area.x, area.right()));
            old.span_mut(y, area.x, area.right())
                .copy_from_slice(current.span(y, area.x, area.right()));
        }
        Ok(Self { rect: area, snapshot })
    }

    /// Put the captured pixels back into `old`, undoing `capture`.
    fn write_back(&self, old: &mut PixelBuffer) {
        let clip = self.rect.intersect(&old.bounds());
        for y in clip.y..clip.bottom() {
            let sy = y - self.rect.y;
            let sx = clip.x - self.rect.x;
            old.span_mut(y, clip.x, clip.right())
                .copy_from_slice(self.snapshot.span(sy, sx, sx + clip.width));
        }
    }
}

impl std::fmt::Debug for DiffRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffRegion").field("rect", &self.rect).finish()
    }
}

/// Computes and restores pixel differences between bitmap versions.
pub struct DiffEngine {
    rng: StdRng,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Engine with a fixed sampling sequence (useful for deterministic tests).
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Record the differences between `old` and `current` inside `area`.
    ///
    /// On success `old` holds the `current` pixels wherever a region was
    /// captured, and the returned regions hold what `old` had there before.
    /// On failure `old` is left exactly as it was.
    pub fn store_diff(
        &mut self,
        old: &mut PixelBuffer,
        current: &PixelBuffer,
        area: Rect,
        alloc: &mut dyn PixelAllocator,
    ) -> Result<Vec<DiffRegion>, OutOfMemory> {
        let bounds = old.bounds().intersect(&current.bounds());
        let area = PixelRect::from_rect(area, bounds);
        let mut regions = Vec::new();
        if let Err(e) = self.store_area(old, current, area, alloc, &mut regions) {
            for region in regions.iter().rev() {
                region.write_back(old);
            }
            return Err(e);
        }
        Ok(regions)
    }

    fn store_area(
        &mut self,
        old: &mut PixelBuffer,
        current: &PixelBuffer,
        area: PixelRect,
        alloc: &mut dyn PixelAllocator,
        regions: &mut Vec<DiffRegion>,
    ) -> Result<(), OutOfMemory> {
        match self.classify(old, current, area) {
            Difference::None => Ok(()),
            Difference::Great => {
                regions.try_reserve(1).map_err(|_| OutOfMemory {
                    requested_bytes: std::mem::size_of::<DiffRegion>(),
                })?;
                regions.push(DiffRegion::capture(old, current, area, alloc)?);
                Ok(())
            }
            Difference::Slight => {
                for quadrant in area.quadrants() {
                    if !quadrant.is_empty() {
                        self.store_area(old, current, quadrant, alloc, regions)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn classify(&mut self, old: &PixelBuffer, current: &PixelBuffer, area: PixelRect) -> Difference {
        if area.is_empty() {
            return Difference::None;
        }

        if area.width < EXHAUSTIVE_LIMIT || area.height < EXHAUSTIVE_LIMIT {
            let differs = (area.y..area.bottom())
                .any(|y| old.span(y, area.x, area.right()) != current.span(y, area.x, area.right()));
            return if differs { Difference::Great } else { Difference::None };
        }

        let differing = (0..SAMPLE_COUNT)
            .filter(|_| {
                let x = self.rng.gen_range(area.x..area.right());
                let y = self.rng.gen_range(area.y..area.bottom());
                old.get(x, y) != current.get(x, y)
            })
            .count();

        if differing as f32 / SAMPLE_COUNT as f32 >= GREAT_DIFFERENCE_FRACTION {
            Difference::Great
        } else {
            Difference::Slight
        }
    }

    /// Swap every stored pixel with the one in `live`, mirroring the new
    /// live value into `shadow`. Regions are clipped to the current bounds
    /// of both buffers, which may have changed since capture.
    ///
    /// Returns the union of the touched rectangles, or `None` if nothing was touched.
    pub fn restore(
        live: &mut PixelBuffer,
        shadow: &mut PixelBuffer,
        regions: &mut [DiffRegion],
    ) -> Option<PixelRect> {
        let mut touched: Option<PixelRect> = None;

        for region in regions.iter_mut() {
            let rect = region.rect;
            let clip = rect.intersect(&live.bounds()).intersect(&shadow.bounds());
            if clip.is_empty() {
                continue;
            }

            let rows = clip.height as usize;
            let x0 = clip.x as usize;
            let width = clip.width as usize;
            let sx0 = (clip.x - rect.x) as usize;
            let sy0 = (clip.y - rect.y) as usize;
            let live_stride = live.stride();
            let shadow_stride = shadow.stride();
            let snap_stride = region.snapshot.stride();

            live.pixels_mut()
                .par_chunks_mut(live_stride)
                .skip(clip.y as usize)
                .take(rows)
                .zip(
                    shadow
                        .pixels_mut()
                        .par_chunks_mut(shadow_stride)
                        .skip(clip.y as usize)
                        .take(rows),
                )
                .zip(
                    region
                        .snapshot
                        .pixels_mut()
                        .par_chunks_mut(snap_stride)
                        .skip(sy0)
                        .take(rows),
                )
                .for_each(|((live_row, shadow_row), snap_row)| {
                    let live_span = &mut live_row[x0..x0 + width];
                    live_span.swap_with_slice(&mut snap_row[sx0..sx0 + width]);
                    shadow_row[x0..x0 + width].copy_from_slice(live_span);
                });

            touched = Some(touched.map_or(clip, |t| t.union(&clip)));
        }

        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SystemAllocator;

    struct FailOnCall {
        calls: usize,
        fail_at: usize,
    }

    impl PixelAllocator for FailOnCall {
        fn allocate(&mut self, width: u32, height: u32) -> Result<PixelBuffer, OutOfMemory> {
            self.calls += 1;
            if self.calls == self.fail_at {
                return Err(OutOfMemory { requested_bytes: width as usize * height as usize * 4 });
            }
            PixelBuffer::try_new(width, height)
        }
    }

    fn full(buf: &PixelBuffer) -> Rect {
        Rect::from_pixel_rect(buf.bounds())
    }

    #[test]
    fn identical_buffers_produce_no_regions() {
        let mut old = PixelBuffer::new_filled(64, 64, 1);
        let current = old.clone();
        let mut engine = DiffEngine::with_seed(1);
        let regions = engine
            .store_diff(&mut old, &current, full(&current), &mut SystemAllocator)
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn wholesale_change_is_one_region() {
        let mut old = PixelBuffer::new_filled(64, 64, 1);
        let current = PixelBuffer::new_filled(64, 64, 2);
        let before = old.clone();
        let mut engine = DiffEngine::with_seed(2);
        let regions = engine
            .store_diff(&mut old, &current, full(&current), &mut SystemAllocator)
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].rect(), PixelRect::from_size(64, 64));
        assert_eq!(old, current);
        assert_eq!(regions[0].snapshot, before);
    }

    #[test]
    fn small_change_stays_small() {
        let mut old = PixelBuffer::new_filled(256, 256, 0);
        let mut current = old.clone();
        current.fill_rect(PixelRect::new(100, 100, 4, 4), 9);
        let mut engine = DiffEngine::with_seed(3);
        let regions = engine
            .store_diff(&mut old, &current, full(&current), &mut SystemAllocator)
            .unwrap();

        assert!(!regions.is_empty());
        let covered: usize = regions.iter().map(|r| r.rect().area()).sum();
        assert!(covered <= (EXHAUSTIVE_LIMIT * EXHAUSTIVE_LIMIT) as usize, "covered {covered}");
        for region in &regions {
            assert!(region.rect().contains_rect(&PixelRect::new(100, 100, 4, 4)));
        }
        assert_eq!(old, current);
    }

    #[test]
    fn area_outside_edit_is_ignored() {
        let mut old = PixelBuffer::new_filled(32, 32, 0);
        let mut current = old.clone();
        current.put(30, 30, 5);
        let mut engine = DiffEngine::with_seed(4);
        let regions = engine
            .store_diff(&mut old, &current, Rect::from_min_max(0.0, 0.0, 8.0, 8.0), &mut SystemAllocator)
            .unwrap();
        assert!(regions.is_empty());
        assert_eq!(old.get(30, 30), 0);
    }

    #[test]
    fn restore_rolls_back_and_forward() {
        let original = PixelBuffer::new_filled(48, 40, 3);
        let mut shadow = original.clone();
        let mut live = original.clone();
        live.fill_rect(PixelRect::new(5, 7, 20, 3), 8);
        live.put(47, 39, 11);
        let edited = live.clone();

        let mut engine = DiffEngine::with_seed(5);
        let mut regions = engine
            .store_diff(&mut shadow, &live, full(&live), &mut SystemAllocator)
            .unwrap();
        assert_eq!(shadow, edited);

        let touched = DiffEngine::restore(&mut live, &mut shadow, &mut regions).unwrap();
        assert_eq!(live, original);
        assert_eq!(shadow, original);
        assert!(touched.contains_rect(&PixelRect::new(5, 7, 20, 3)));

        DiffEngine::restore(&mut live, &mut shadow, &mut regions);
        assert_eq!(live, edited);
        assert_eq!(shadow, edited);
    }

    #[test]
    fn failed_store_leaves_old_untouched() {
        let mut old = PixelBuffer::new_filled(256, 256, 0);
        let before = old.clone();
        let mut current = old.clone();
        current.fill_rect(PixelRect::new(2, 2, 4, 4), 1);
        current.fill_rect(PixelRect::new(200, 200, 4, 4), 1);

        let mut alloc = FailOnCall { calls: 0, fail_at: 2 };
        let mut engine = DiffEngine::with_seed(6);
        let result = engine.store_diff(&mut old, &current, full(&current), &mut alloc);
        assert!(result.is_err());
        assert_eq!(old, before);
    }

    #[test]
    fn restore_clips_to_shrunken_buffer() {
        let mut shadow = PixelBuffer::new_filled(32, 32, 0);
        let current = PixelBuffer::new_filled(32, 32, 1);
        let mut engine = DiffEngine::with_seed(7);
        let mut regions = engine
            .store_diff(&mut shadow, &current, full(&current), &mut SystemAllocator)
            .unwrap();

        let mut live = PixelBuffer::new_filled(10, 10, 1);
        let mut small_shadow = live.clone();
        let touched = DiffEngine::restore(&mut live, &mut small_shadow, &mut regions);
        assert_eq!(touched, Some(PixelRect::from_size(10, 10)));
        assert!(live.pixels().iter().all(|&p| p == 0));
    }
}
