// ============================================================================
// STROKE EVALUATION: masked mean colour and absolute error
// ============================================================================

use crate::brush::BrushMask;
use crate::canvas::shared::{Rgb16, SENTINEL_OFFSET};
use crate::grid::{Region, SourceImage};

/// Canvas pixels of `region` covered by `mask`, whose top-left corner lies at
/// `origin` (possibly off-canvas).  `region` must be the clipped mask square.
pub fn masked_pixels(
    region: Region,
    origin: (i64, i64),
    mask: &BrushMask,
) -> impl Iterator<Item = (u32, u32)> + '_ {
    (region.y0..region.y1).flat_map(move |y| {
        (region.x0..region.x1).filter_map(move |x| {
            let mx = (x as i64 - origin.0) as u32;
            let my = (y as i64 - origin.1) as u32;
            mask.is_set(mx, my).then_some((x, y))
        })
    })
}

/// Rounded mean of `src` over the masked pixels, offset by +1.
/// `None` when the mask covers nothing inside `region`.
pub fn masked_mean(
    src: &SourceImage,
    region: Region,
    origin: (i64, i64),
    mask: &BrushMask,
) -> Option<Rgb16> {
    let mut sum = [0u64; 3];
    let mut area = 0u64;
    for (x, y) in masked_pixels(region, origin, mask) {
        let px = src.get(x, y);
        for c in 0..3 {
            sum[c] += px[c] as u64;
        }
        area += 1;
    }
    if area == 0 {
        return None;
    }
    Some(sum.map(|s| ((s as f64 / area as f64 + 0.5).floor() as u16) + SENTINEL_OFFSET))
}

/// `Σ |src − (canvas − 1)|` over `region`, with `pixels` holding the canvas
/// values of `region` in row-major order.  Unpainted pixels count as −1.
pub fn absolute_error(src: &SourceImage, region: Region, pixels: &[Rgb16]) -> u64 {
    let w = region.width() as usize;
    let mut total = 0u64;
    for (y, row) in (region.y0..region.y1).zip(pixels.chunks_exact(w)) {
        for (x, p) in (region.x0..region.x1).zip(row) {
            let s = src.get(x, y);
            for c in 0..3 {
                let painted = p[c] as i32 - SENTINEL_OFFSET as i32;
                total += (s[c] as i32 - painted).unsigned_abs() as u64;
            }
        }
    }
    total
}

/// Strict improvement: ties are rejected.
#[inline]
pub fn improves(old_error: u64, new_error: u64) -> bool {
    old_error > new_error
}
