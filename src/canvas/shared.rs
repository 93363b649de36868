//! Shared paint buffer: committed pixels plus the per-pixel version grid,
//! both guarded by one mutex.
//!
//! Pixels are stored with a +1 offset per channel so `[0, 0, 0]` can only
//! mean "never painted".  Versions are an optimistic-concurrency fence: a
//! pixel's version goes up by one for every accepted stroke whose bounding
//! box covers it, and never goes down.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::brush::BrushMask;
use crate::canvas::evaluate::masked_pixels;
use crate::grid::Region;

/// Offset channel triple (`colour + 1`).
pub type Rgb16 = [u16; 3];

/// Added to every committed channel value.
pub const SENTINEL_OFFSET: u16 = 1;
/// Pixel value of a canvas pixel no stroke or fill has touched.
pub const UNPAINTED: Rgb16 = [0, 0, 0];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanvasBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Rgb16>,
    versions: Vec<u32>,
}

impl CanvasBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: vec![UNPAINTED; len],
            versions: vec![0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgb16 {
        self.pixels[self.index(x, y)]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: Rgb16) {
        let idx = self.index(x, y);
        self.pixels[idx] = value;
    }

    #[inline]
    pub fn version(&self, x: u32, y: u32) -> u32 {
        self.versions[self.index(x, y)]
    }

    pub fn pixels(&self) -> &[Rgb16] {
        &self.pixels
    }

    pub fn versions(&self) -> &[u32] {
        &self.versions
    }

    pub fn is_unpainted(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y) == UNPAINTED
    }

    pub fn unpainted_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p == UNPAINTED).count()
    }

    /// Copy the version numbers of `region` (row-major) into `out`.
    pub fn copy_versions(&self, region: Region, out: &mut Vec<u32>) {
        out.clear();
        out.reserve(region.area());
        for y in region.y0..region.y1 {
            let row = self.index(region.x0, y);
            out.extend_from_slice(&self.versions[row..row + region.width() as usize]);
        }
    }

    /// Copy the committed pixels of `region` (row-major) into `out`.
    pub fn copy_pixels(&self, region: Region, out: &mut Vec<Rgb16>) {
        out.clear();
        out.reserve(region.area());
        for y in region.y0..region.y1 {
            let row = self.index(region.x0, y);
            out.extend_from_slice(&self.pixels[row..row + region.width() as usize]);
        }
    }

    /// True when no pixel of `region` changed version since `snapshot` was taken.
    pub fn versions_match(&self, region: Region, snapshot: &[u32]) -> bool {
        if snapshot.len() != region.area() {
            return false;
        }
        let w = region.width() as usize;
        (region.y0..region.y1).zip(snapshot.chunks_exact(w)).all(|(y, snap_row)| {
            let row = self.index(region.x0, y);
            &self.versions[row..row + w] == snap_row
        })
    }

    /// Advance the version of every pixel in `region` by one.
    pub fn bump_versions(&mut self, region: Region) {
        for y in region.y0..region.y1 {
            let row = self.index(region.x0, y);
            for v in &mut self.versions[row..row + region.width() as usize] {
                *v += 1;
            }
        }
    }

    /// Write `color` to every pixel of `region` covered by `mask`, whose
    /// top-left corner sits at `origin` in canvas coordinates.
    pub fn paint_masked(&mut self, region: Region, origin: (i64, i64), mask: &BrushMask, color: Rgb16) {
        for (x, y) in masked_pixels(region, origin, mask) {
            self.set_pixel(x, y, color);
        }
    }
}

/// The one lock around pixels + versions.
#[derive(Debug)]
pub struct SharedCanvas {
    inner: Mutex<CanvasBuffer>,
}

impl SharedCanvas {
    pub fn new(buffer: CanvasBuffer) -> Self {
        Self {
            inner: Mutex::new(buffer),
        }
    }

    /// Lock the buffer.  A poisoned lock is recovered: the buffer is only
    /// mutated in whole-stroke units while held.
    pub fn lock(&self) -> MutexGuard<'_, CanvasBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access without locking (no task can be running).
    pub fn get_mut(&mut self) -> &mut CanvasBuffer {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> CanvasBuffer {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
