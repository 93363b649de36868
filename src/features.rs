// ============================================================================
// FEATURE MAPS: edge magnitude, edge orientation, DoG region classes
// ============================================================================
//
// Read-only per-pixel guidance for stroke placement:
//   magnitude   → which size bucket may paint here (strong edges = small strokes)
//   orientation → which rotated brush mask to use
//   region      → which brush family may paint here

use std::collections::HashMap;
use std::f64::consts::TAU;

use rayon::prelude::*;

use crate::brush::{BrushFamily, SIZE_BUCKETS, brush_angles};
use crate::grid::{Grid, SourceImage};
use crate::ops::filters::{
    box_filter, downsample_half, gaussian_blur, normalize_to_u8, resize_bilinear,
    sobel_magnitude_rgb, sobel_orientation,
};

/// Pyramid levels stop once a side would drop below this.
const PYRAMID_MIN_SIDE: u32 = 40;
/// Box filter applied to the grayscale before measuring orientation.
const ORIENTATION_SMOOTHING: usize = 5;
/// Scales of the multi-scale difference of Gaussians.
const DOG_SIGMAS: [u32; 4] = [1, 2, 4, 8];
/// Normalised DoG values at or above this are `RegionClass::Hi`.
const DOG_THRESHOLD: u8 = 64;
/// Width of one magnitude bucket.
const MAGNITUDE_BUCKET_WIDTH: u8 = 51;

/// Two-valued thresholded DoG response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionClass {
    Lo,
    Hi,
}

impl RegionClass {
    /// Compact brushes paint flat (low DoG) areas, elongated brushes paint
    /// detailed (high DoG) areas.
    pub fn matches(self, family: BrushFamily) -> bool {
        matches!(
            (self, family),
            (RegionClass::Lo, BrushFamily::Compact) | (RegionClass::Hi, BrushFamily::Elongated)
        )
    }
}

/// Bucket of an edge magnitude: `[0,51]→0, [52,102]→1, … [205,255]→4`.
pub fn magnitude_bucket(magnitude: u8) -> usize {
    if magnitude == 0 {
        return 0;
    }
    (((magnitude - 1) / MAGNITUDE_BUCKET_WIDTH) as usize).min(SIZE_BUCKETS - 1)
}

/// Index of the entry of `angles` closest to `angle`, treating the table as
/// circular.  Ties go to the earlier index.
pub fn nearest_angle_index(angles: &[f64], angle: f64) -> usize {
    let angle = angle.rem_euclid(TAU);
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &a) in angles.iter().enumerate() {
        let d = (a - angle).abs();
        let d = d.min(TAU - d);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

#[derive(Clone, Debug)]
pub struct FeatureMaps {
    magnitude: Grid<u8>,
    orientation: Grid<f32>,
    region: Grid<RegionClass>,
    brush_angles: Vec<f64>,
}

impl FeatureMaps {
    /// Assemble maps computed elsewhere.  Returns `None` if the grids differ
    /// in size.
    pub fn from_parts(
        magnitude: Grid<u8>,
        orientation: Grid<f32>,
        region: Grid<RegionClass>,
    ) -> Option<Self> {
        let dims = (magnitude.width, magnitude.height);
        if (orientation.width, orientation.height) != dims || (region.width, region.height) != dims {
            return None;
        }
        Some(Self {
            magnitude,
            orientation,
            region,
            brush_angles: brush_angles().to_vec(),
        })
    }

    /// Derive all maps from the source photograph.
    pub fn extract(src: &SourceImage) -> Self {
        let gray = src.grayscale();
        let ((magnitude, orientation), region) = rayon::join(
            || rayon::join(|| magnitude_map(src), || orientation_map(&gray)),
            || region_map(&gray),
        );
        Self {
            magnitude,
            orientation,
            region,
            brush_angles: brush_angles().to_vec(),
        }
    }

    pub fn width(&self) -> u32 {
        self.magnitude.width
    }

    pub fn height(&self) -> u32 {
        self.magnitude.height
    }

    pub fn magnitude(&self, x: u32, y: u32) -> u8 {
        *self.magnitude.get(x, y)
    }

    pub fn orientation(&self, x: u32, y: u32) -> f64 {
        *self.orientation.get(x, y) as f64
    }

    pub fn region_class(&self, x: u32, y: u32) -> RegionClass {
        *self.region.get(x, y)
    }

    pub fn brush_angles(&self) -> &[f64] {
        &self.brush_angles
    }

    /// Orientation index of the brush mask to use at `(x, y)`.
    pub fn orientation_index(&self, x: u32, y: u32) -> usize {
        nearest_angle_index(&self.brush_angles, self.orientation(x, y))
    }

    pub fn magnitude_grid(&self) -> &Grid<u8> {
        &self.magnitude
    }

    pub fn region_grid(&self) -> &Grid<RegionClass> {
        &self.region
    }
}

/// Sobel magnitude summed over an image pyramid, normalised to `0..=255`.
fn magnitude_map(src: &SourceImage) -> Grid<u8> {
    let (w, h) = (src.width(), src.height());
    let base = src.pixels().as_slice().iter().map(|p| p.map(|c| c as f32)).collect();
    let mut level = Grid::from_vec(w, h, base).unwrap_or_else(|| Grid::new(w, h, [0.0; 3]));

    let mut acc = sobel_magnitude_rgb(&level);
    while level.width >= PYRAMID_MIN_SIDE && level.height >= PYRAMID_MIN_SIDE {
        level = downsample_half(&level);
        let up = resize_bilinear(&sobel_magnitude_rgb(&level), w, h);
        acc.as_mut_slice()
            .par_iter_mut()
            .zip(up.as_slice().par_iter())
            .for_each(|(a, u)| *a += u.round());
    }
    normalize_to_u8(&acc)
}

fn orientation_map(gray: &Grid<f32>) -> Grid<f32> {
    sobel_orientation(&box_filter(gray, ORIENTATION_SMOOTHING))
}

/// Multi-scale DoG: `Σ |G(2σ) − G(σ)|`, normalised and thresholded.
fn region_map(gray: &Grid<f32>) -> Grid<RegionClass> {
    let mut wanted: Vec<u32> = DOG_SIGMAS.iter().flat_map(|&s| [s, 2 * s]).collect();
    wanted.sort_unstable();
    wanted.dedup();
    let blurred: HashMap<u32, Grid<f32>> = wanted
        .into_par_iter()
        .map(|s| (s, gaussian_blur(gray, s)))
        .collect();

    let mut dog = Grid::new(gray.width, gray.height, 0.0f32);
    for sigma in DOG_SIGMAS {
        let (Some(g1), Some(g2)) = (blurred.get(&sigma), blurred.get(&(2 * sigma))) else {
            continue;
        };
        for ((d, a), b) in dog
            .as_mut_slice()
            .iter_mut()
            .zip(g1.as_slice())
            .zip(g2.as_slice())
        {
            *d += (b - a).abs();
        }
    }

    let norm = normalize_to_u8(&dog);
    let classes = norm
        .as_slice()
        .iter()
        .map(|&v| if v < DOG_THRESHOLD { RegionClass::Lo } else { RegionClass::Hi })
        .collect();
    Grid::from_vec(gray.width, gray.height, classes)
        .unwrap_or_else(|| Grid::new(gray.width, gray.height, RegionClass::Lo))
}
