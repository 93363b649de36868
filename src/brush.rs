// ============================================================================
// BRUSH ATLAS: binary brush masks by family, size bucket and orientation
// ============================================================================
//
// Two base brushes (compact + elongated) are rescaled to five sizes
// (1/5 .. 5/5 of the base side) and rotated to 16 orientations.  Rotated
// masks live in a square whose side is the diagonal of the scaled brush, so
// no part of the brush is cropped by the rotation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of stroke size buckets (1/5 .. 5/5 of the base brush).
pub const SIZE_BUCKETS: usize = 5;
/// Number of discrete brush orientations.
pub const ORIENTATIONS: usize = 16;
/// Luma below this value marks a brush pixel in a brush image.
pub const BRUSH_LUMA_THRESHOLD: u8 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrushFamily {
    /// Round-ish dabs, painted where the DoG map is low.
    Compact,
    /// Long strokes, painted where the DoG map is high.
    Elongated,
}

impl BrushFamily {
    pub fn index(self) -> usize {
        match self {
            BrushFamily::Compact => 0,
            BrushFamily::Elongated => 1,
        }
    }

    pub fn all() -> [BrushFamily; 2] {
        [BrushFamily::Compact, BrushFamily::Elongated]
    }

    pub fn label(self) -> &'static str {
        match self {
            BrushFamily::Compact => "compact",
            BrushFamily::Elongated => "elongated",
        }
    }
}

/// Orientation table: `i · 22.5°` for `i` in `0..16`, ascending in `[0, 2π)`.
pub fn brush_angles() -> [f64; ORIENTATIONS] {
    let step = std::f64::consts::TAU / ORIENTATIONS as f64;
    std::array::from_fn(|i| i as f64 * step)
}

/// Square binary occupancy grid.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrushMask {
    side: u32,
    bits: Vec<bool>,
}

impl BrushMask {
    pub fn empty(side: u32) -> Self {
        Self {
            side,
            bits: vec![false; side as usize * side as usize],
        }
    }

    /// Every pixel set.
    pub fn full(side: u32) -> Self {
        Self {
            side,
            bits: vec![true; side as usize * side as usize],
        }
    }

    pub fn from_fn<F: Fn(u32, u32) -> bool>(side: u32, f: F) -> Self {
        let mut mask = Self::empty(side);
        for y in 0..side {
            for x in 0..side {
                mask.set(x, y, f(x, y));
            }
        }
        mask
    }

    /// Dark pixels of a grayscale brush image are brush pixels.  Non-square
    /// images are centred in a square of their longer side.
    pub fn from_gray(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let side = w.max(h);
        let ox = (side - w) / 2;
        let oy = (side - h) / 2;
        let mut mask = Self::empty(side);
        for (x, y, p) in img.enumerate_pixels() {
            if p.0[0] < BRUSH_LUMA_THRESHOLD {
                mask.set(x + ox, y + oy, true);
            }
        }
        mask
    }

    /// Side of the bounding square.
    pub fn side(&self) -> u32 {
        self.side
    }

    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.side as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = y as usize * self.side as usize + x as usize;
        self.bits[idx] = value;
    }

    /// Number of set pixels.
    pub fn coverage(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Bilinear resample of the coverage to `new_side`; output pixels with
    /// coverage ≥ 0.5 are set.
    pub fn rescale(&self, new_side: u32) -> BrushMask {
        if new_side == self.side {
            return self.clone();
        }
        if new_side == 0 || self.side == 0 {
            return BrushMask::empty(new_side);
        }
        let n = self.side as usize;
        let scale = self.side as f32 / new_side as f32;
        let sample = |x: usize, y: usize| if self.bits[y * n + x] { 1.0f32 } else { 0.0 };
        BrushMask::from_fn(new_side, |x, y| {
            let fx = ((x as f32 + 0.5) * scale - 0.5).clamp(0.0, (n - 1) as f32);
            let fy = ((y as f32 + 0.5) * scale - 0.5).clamp(0.0, (n - 1) as f32);
            let x0 = fx.floor() as usize;
            let y0 = fy.floor() as usize;
            let x1 = (x0 + 1).min(n - 1);
            let y1 = (y0 + 1).min(n - 1);
            let tx = fx - x0 as f32;
            let ty = fy - y0 as f32;
            let top = sample(x0, y0) + tx * (sample(x1, y0) - sample(x0, y0));
            let bot = sample(x0, y1) + tx * (sample(x1, y1) - sample(x0, y1));
            top + ty * (bot - top) >= 0.5
        })
    }

    /// Rotate by `angle` radians into a square of side `target_side`.
    ///
    /// Each brush pixel is rotated about the centre and votes for the four
    /// target pixels around its landing point; a target pixel with two or
    /// more votes is part of the rotated brush.  This closes the pinholes a
    /// plain forward mapping leaves behind.
    pub fn rotate(&self, angle: f64, target_side: u32) -> BrushMask {
        let m = target_side as usize;
        if m == 0 {
            return BrushMask::empty(0);
        }
        let (sin, cos) = (angle.sin() as f32, angle.cos() as f32);
        let in_mid = (self.side as f32 + 1.0) / 2.0 - 1.0;
        let out_mid = (target_side as f32 + 1.0) / 2.0 - 1.0;
        let max = (m - 1) as f32;

        let mut votes = vec![0u8; m * m];
        for y in 0..self.side {
            for x in 0..self.side {
                if !self.is_set(x, y) {
                    continue;
                }
                let x0 = x as f32 - in_mid;
                let y0 = y as f32 - in_mid;
                let x1 = cos * x0 - sin * y0 + out_mid;
                let y1 = sin * x0 + cos * y0 + out_mid;
                let x_lo = x1.clamp(0.0, max) as usize;
                let y_lo = y1.clamp(0.0, max) as usize;
                let x_hi = (x_lo + 1).min(m - 1);
                let y_hi = (y_lo + 1).min(m - 1);
                for (vx, vy) in [(x_lo, y_lo), (x_hi, y_lo), (x_lo, y_hi), (x_hi, y_hi)] {
                    let v = &mut votes[vy * m + vx];
                    *v = v.saturating_add(1);
                }
            }
        }

        BrushMask {
            side: target_side,
            bits: votes.into_iter().map(|v| v >= 2).collect(),
        }
    }
}

/// Side of the square that holds an `n × n` brush at any rotation.
pub fn diagonal_side(n: u32) -> u32 {
    (2.0 * (n as f64) * (n as f64)).sqrt() as u32
}

/// All masks for both families, `[family][size][orientation]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushAtlas {
    masks: Vec<BrushMask>,
    sides: [[u32; SIZE_BUCKETS]; 2],
    angles: Vec<f64>,
    fingerprint: u64,
}

impl BrushAtlas {
    #[inline]
    fn slot(family: BrushFamily, size: usize, orientation: usize) -> usize {
        (family.index() * SIZE_BUCKETS + size) * ORIENTATIONS + orientation
    }

    /// Rescale both base brushes by `scale`, derive the five sizes, and
    /// rotate every size to every orientation (in parallel).
    pub fn build(compact: &BrushMask, elongated: &BrushMask, scale: f32) -> Self {
        let angles = brush_angles();
        let bases = [compact, elongated].map(|base| {
            let side = (base.side() as f32 * scale).round().max(0.0) as u32;
            base.rescale(side)
        });

        let mut scaled: Vec<BrushMask> = Vec::with_capacity(2 * SIZE_BUCKETS);
        let mut sides = [[0u32; SIZE_BUCKETS]; 2];
        for (f, base) in bases.iter().enumerate() {
            let n = base.side();
            for (s, side) in sides[f].iter_mut().enumerate() {
                let mask = if s == SIZE_BUCKETS - 1 {
                    base.clone()
                } else {
                    base.rescale((s as u32 + 1) * n / SIZE_BUCKETS as u32)
                };
                *side = diagonal_side(mask.side());
                scaled.push(mask);
            }
        }

        let masks: Vec<BrushMask> = (0..2 * SIZE_BUCKETS * ORIENTATIONS)
            .into_par_iter()
            .map(|slot| {
                let fs = slot / ORIENTATIONS;
                let o = slot % ORIENTATIONS;
                let (f, s) = (fs / SIZE_BUCKETS, fs % SIZE_BUCKETS);
                scaled[fs].rotate(angles[o], sides[f][s])
            })
            .collect();

        Self {
            masks,
            sides,
            angles: angles.to_vec(),
            fingerprint: Self::fingerprint(compact, elongated, scale),
        }
    }

    /// Atlas from an explicit mask generator.  Bounding sides are taken from
    /// the orientation-0 mask of each size.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(BrushFamily, usize, usize) -> BrushMask,
    {
        let mut masks = Vec::with_capacity(2 * SIZE_BUCKETS * ORIENTATIONS);
        let mut sides = [[0u32; SIZE_BUCKETS]; 2];
        for family in BrushFamily::all() {
            for size in 0..SIZE_BUCKETS {
                for orientation in 0..ORIENTATIONS {
                    let mask = f(family, size, orientation);
                    if orientation == 0 {
                        sides[family.index()][size] = mask.side();
                    }
                    masks.push(mask);
                }
            }
        }
        Self {
            masks,
            sides,
            angles: brush_angles().to_vec(),
            fingerprint: 0,
        }
    }

    pub fn mask(&self, family: BrushFamily, size: usize, orientation: usize) -> &BrushMask {
        &self.masks[Self::slot(family, size, orientation)]
    }

    /// Side of the square bounding box for this family and size bucket.
    pub fn bounding_side(&self, family: BrushFamily, size: usize) -> u32 {
        self.sides[family.index()][size]
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Identity of the inputs this atlas was built from.
    pub fn fingerprint_value(&self) -> u64 {
        self.fingerprint
    }

    pub fn fingerprint(compact: &BrushMask, elongated: &BrushMask, scale: f32) -> u64 {
        let mut hasher = DefaultHasher::new();
        compact.hash(&mut hasher);
        elongated.hash(&mut hasher);
        scale.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}
