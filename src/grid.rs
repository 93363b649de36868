// ============================================================================
// GRIDS: flat row-major 2-D buffers, clipped regions, RGB source images
// ============================================================================

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Row-major 2-D buffer.  Index of `(x, y)` is `y * width + x`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    pub width: u32,
    pub height: u32,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width as usize * height as usize],
        }
    }
}

impl<T> Grid<T> {
    /// Wrap an existing buffer.  Returns `None` if the length does not match.
    pub fn from_vec(width: u32, height: u32, data: Vec<T>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self { width, height, data })
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> &T {
        &self.data[self.index(x, y)]
    }

    #[inline]
    pub fn get_mut(&mut self, x: u32, y: u32) -> &mut T {
        let idx = self.index(x, y);
        &mut self.data[idx]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`, always inside the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Region {
    /// Square of side `side` centred on `(cx, cy)` (top-left at `c - side/2`),
    /// clipped to a `width × height` canvas.
    ///
    /// Returns the clipped region together with the unclipped top-left corner,
    /// which is the origin of the brush mask in canvas coordinates.  `None` when
    /// nothing of the square remains on the canvas.
    pub fn centered_square(
        cx: i64,
        cy: i64,
        side: u32,
        width: u32,
        height: u32,
    ) -> Option<(Region, (i64, i64))> {
        let half = (side / 2) as i64;
        let left = cx - half;
        let top = cy - half;
        let x0 = left.max(0);
        let y0 = top.max(0);
        let x1 = (left + side as i64).min(width as i64);
        let y1 = (top + side as i64).min(height as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((
            Region {
                x0: x0 as u32,
                y0: y0 as u32,
                x1: x1 as u32,
                y1: y1 as u32,
            },
            (left, top),
        ))
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Local index of canvas pixel `(x, y)` inside a region-sized buffer.
    #[inline]
    pub fn local_index(&self, x: u32, y: u32) -> usize {
        (y - self.y0) as usize * self.width() as usize + (x - self.x0) as usize
    }
}

/// Immutable RGB source photograph (or its noisy copy).
#[derive(Clone, Debug, PartialEq)]
pub struct SourceImage {
    pixels: Grid<[u8; 3]>,
}

impl SourceImage {
    pub fn new(pixels: Grid<[u8; 3]>) -> Self {
        Self { pixels }
    }

    /// Uniformly coloured image, mostly useful for tests.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(Grid::new(width, height, color))
    }

    pub fn from_rgb_image(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let data = img.pixels().map(|p| p.0).collect();
        // Length always matches: one entry per pixel of `img`.
        Self::new(Grid { width: w, height: h, data })
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let raw: Vec<u8> = self.pixels.as_slice().iter().flatten().copied().collect();
        RgbImage::from_raw(self.width(), self.height(), raw)
            .unwrap_or_else(|| RgbImage::new(self.width(), self.height()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width
    }

    pub fn height(&self) -> u32 {
        self.pixels.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        *self.pixels.get(x, y)
    }

    pub fn set(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        self.pixels.set(x, y, rgb);
    }

    pub fn pixels(&self) -> &Grid<[u8; 3]> {
        &self.pixels
    }

    /// Equal-weight grayscale, `round((r + g + b) / 3)`.
    pub fn grayscale(&self) -> Grid<f32> {
        let data = self
            .pixels
            .as_slice()
            .iter()
            .map(|p| ((p[0] as f32 + p[1] as f32 + p[2] as f32) / 3.0).round())
            .collect();
        Grid {
            width: self.width(),
            height: self.height(),
            data,
        }
    }

    /// True when every pixel is pure black.
    pub fn is_black(&self) -> bool {
        self.pixels.as_slice().iter().all(|p| *p == [0, 0, 0])
    }
}
