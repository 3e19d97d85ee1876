use image::RgbaImage;

use crate::error::OutOfMemory;
use crate::geometry::PixelRect;

/// A rectangular 32-bit-per-pixel bitmap. Rows are tightly packed, so the
/// stride is always `width`.
///
/// Pixels are opaque words; the history engine only ever compares them for
/// exact equality.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    /// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
    pub fn try_new(width: u32, height: u32) -> Result<Self, OutOfMemory> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or(OutOfMemory { requested_bytes: usize::MAX })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| OutOfMemory { requested_bytes: len.saturating_mul(4) })?;
        pixels.resize(len, 0);
        Ok(Self { width, height, pixels })
    }

    /// Infallible constructor for hosts that create layers outside the history engine.
    pub fn new_filled(width: u32, height: u32, value: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self { width, height, pixels })
    }

    /// Pack an RGBA image into little-endian pixel words.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let (width, height) = src.dimensions();
        let pixels = src.pixels().map(|p| u32::from_le_bytes(p.0)).collect();
        Self { width, height, pixels }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut raw = Vec::with_capacity(self.pixels.len() * 4);
        for px in &self.pixels {
            raw.extend_from_slice(&px.to_le_bytes());
        }
        // The raw length always matches width * height * 4.
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Copy this buffer into storage obtained from `alloc`.
    pub fn try_clone_in(&self, alloc: &mut dyn PixelAllocator) -> Result<Self, OutOfMemory> {
        let mut copy = alloc.allocate(self.width, self.height)?;
        copy.pixels.copy_from_slice(&self.pixels);
        Ok(copy)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.width as usize
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::from_size(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<u32>()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.stride() + x as usize]
    }

    #[inline]
    pub fn put(&mut self, x: u32, y: u32, value: u32) {
        let stride = self.stride();
        self.pixels[y as usize * stride + x as usize] = value;
    }

    /// The pixels of row `y` between columns `x0` (inclusive) and `x1` (exclusive).
    #[inline]
    pub fn span(&self, y: u32, x0: u32, x1: u32) -> &[u32] {
        let start = y as usize * self.stride();
        &self.pixels[start + x0 as usize..start + x1 as usize]
    }

    #[inline]
    pub fn span_mut(&mut self, y: u32, x0: u32, x1: u32) -> &mut [u32] {
        let start = y as usize * self.stride();
        &mut self.pixels[start + x0 as usize..start + x1 as usize]
    }

    /// Fill `rect` (clipped to the bounds) with `value`.
    pub fn fill_rect(&mut self, rect: PixelRect, value: u32) {
        let r = rect.intersect(&self.bounds());
        for y in r.y..r.bottom() {
            self.span_mut(y, r.x, r.right()).fill(value);
        }
    }
}

/// Source of pixel storage for everything the history engine keeps.
///
/// All snapshot, spare and structural copies go through this seam so a host
/// can cap history memory, and tests can make allocation fail on demand.
pub trait PixelAllocator {
    fn allocate(&mut self, width: u32, height: u32) -> Result<PixelBuffer, OutOfMemory>;
}

/// Allocates from the global heap, surfacing failure as [`OutOfMemory`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl PixelAllocator for SystemAllocator {
    fn allocate(&mut self, width: u32, height: u32) -> Result<PixelBuffer, OutOfMemory> {
        PixelBuffer::try_new(width, height)
    }
}
