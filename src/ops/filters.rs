// ============================================================================
// IMAGE FILTERS: Gaussian blur, box filter, Sobel, resampling
// ============================================================================

use image::RgbImage;
use rayon::prelude::*;

use crate::grid::Grid;

/// Mirror an out-of-range index back into `0..n` (edge pixel repeated:
/// `-1 → 0`, `n → n-1`).  Kernels wider than the image fall back to clamping.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i - 1
    } else if i >= n {
        2 * n - i - 1
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

/// Build a 1-D Gaussian kernel truncated at ceil(3*sigma).
pub fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let mut kernel = vec![0.0f32; len];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        let v = (-x * x / s2).exp();
        *k = v;
        sum += v;
    }
    let inv = 1.0 / sum;
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

// ---------------------------------------------------------------------------
//  Separable convolution on f32 grids (rayon, reflect padding)
// ---------------------------------------------------------------------------

fn convolve_separable(src: &Grid<f32>, kernel: &[f32]) -> Grid<f32> {
    let w = src.width as usize;
    let h = src.height as usize;
    if w == 0 || h == 0 {
        return src.clone();
    }
    let radius = (kernel.len() / 2) as isize;
    let buf_in = src.as_slice();

    // --- Horizontal pass (parallel by row) ---
    let mut buf_h = vec![0.0f32; w * h];
    buf_h.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        let row_in = &buf_in[y * w..(y + 1) * w];
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = reflect(x as isize + ki as isize - radius, w);
                acc += row_in[sx] * kv;
            }
            *out = acc;
        }
    });

    // --- Vertical pass (parallel by row) ---
    let mut buf_v = vec![0.0f32; w * h];
    buf_v.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = reflect(y as isize + ki as isize - radius, h);
                acc += buf_h[sy * w + x] * kv;
            }
            *out = acc;
        }
    });

    Grid::from_vec(src.width, src.height, buf_v).unwrap_or_else(|| src.clone())
}

/// Gaussian blur with kernel size `6σ + 1`.  `sigma < 1` returns the input.
pub fn gaussian_blur(src: &Grid<f32>, sigma: u32) -> Grid<f32> {
    if sigma < 1 {
        return src.clone();
    }
    convolve_separable(src, &build_gaussian_kernel(sigma as f32))
}

/// Odd-sized mean filter, rounded to whole values.
pub fn box_filter(src: &Grid<f32>, size: usize) -> Grid<f32> {
    let size = size.max(1) | 1;
    let kernel = vec![1.0 / size as f32; size];
    let mut out = convolve_separable(src, &kernel);
    for v in out.as_mut_slice() {
        *v = v.round();
    }
    out
}

/// Blur each channel of an RGB image, rounding and clamping back to 8 bits.
pub fn gaussian_blur_rgb(src: &RgbImage, sigma: u32) -> RgbImage {
    if sigma < 1 {
        return src.clone();
    }
    let (w, h) = src.dimensions();
    let kernel = build_gaussian_kernel(sigma as f32);
    let raw = src.as_raw();
    let blurred: Vec<Grid<f32>> = (0..3)
        .into_par_iter()
        .map(|c| {
            let channel = raw.iter().skip(c).step_by(3).map(|&v| v as f32).collect();
            let grid = Grid::from_vec(w, h, channel).unwrap_or_else(|| Grid::new(w, h, 0.0));
            convolve_separable(&grid, &kernel)
        })
        .collect();

    let mut dst = Vec::with_capacity(raw.len());
    for i in 0..(w as usize * h as usize) {
        for channel in &blurred {
            dst.push(channel.as_slice()[i].round().clamp(0.0, 255.0) as u8);
        }
    }
    RgbImage::from_raw(w, h, dst).unwrap_or_else(|| src.clone())
}

// ---------------------------------------------------------------------------
//  Edge detection
// ---------------------------------------------------------------------------

/// Horizontal and vertical Sobel responses at interior pixel `(x, y)`.
#[inline]
fn sobel_at<F: Fn(usize, usize) -> f32>(p: F, x: usize, y: usize) -> (f32, f32) {
    let gx = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
        - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
    let gy = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
        - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
    (gx, gy)
}

/// Sobel gradient magnitude of a colour image, maximum over the three
/// channels.  The one-pixel border stays zero.
pub fn sobel_magnitude_rgb(src: &Grid<[f32; 3]>) -> Grid<f32> {
    let w = src.width as usize;
    let h = src.height as usize;
    let mut out = vec![0.0f32; w * h];
    if w < 3 || h < 3 {
        return Grid::from_vec(src.width, src.height, out).unwrap_or_else(|| Grid::new(0, 0, 0.0));
    }
    let data = src.as_slice();
    out.par_chunks_mut(w)
        .enumerate()
        .skip(1)
        .take(h - 2)
        .for_each(|(y, row_out)| {
            for x in 1..w - 1 {
                let mut max_mag = 0.0f32;
                for c in 0..3 {
                    let (gx, gy) = sobel_at(|px, py| data[py * w + px][c], x, y);
                    max_mag = max_mag.max((gx * gx + gy * gy).sqrt());
                }
                row_out[x] = max_mag.floor();
            }
        });
    Grid::from_vec(src.width, src.height, out).unwrap_or_else(|| Grid::new(0, 0, 0.0))
}

/// Gradient direction `atan2(Gy, Gx)` in radians.  Border pixels are zero.
pub fn sobel_orientation(src: &Grid<f32>) -> Grid<f32> {
    let w = src.width as usize;
    let h = src.height as usize;
    let mut out = vec![0.0f32; w * h];
    if w >= 3 && h >= 3 {
        let data = src.as_slice();
        out.par_chunks_mut(w)
            .enumerate()
            .skip(1)
            .take(h - 2)
            .for_each(|(y, row_out)| {
                for x in 1..w - 1 {
                    let (gx, gy) = sobel_at(|px, py| data[py * w + px], x, y);
                    row_out[x] = gy.atan2(gx);
                }
            });
    }
    Grid::from_vec(src.width, src.height, out).unwrap_or_else(|| Grid::new(0, 0, 0.0))
}

// ---------------------------------------------------------------------------
//  Resampling / normalisation
// ---------------------------------------------------------------------------

/// Halve both dimensions, each output pixel the mean of its 2×2 block.
pub fn downsample_half(src: &Grid<[f32; 3]>) -> Grid<[f32; 3]> {
    let w = src.width / 2;
    let h = src.height / 2;
    let mut out = Grid::new(w, h, [0.0f32; 3]);
    for y in 0..h {
        for x in 0..w {
            let a = src.get(2 * x, 2 * y);
            let b = src.get(2 * x + 1, 2 * y);
            let c = src.get(2 * x, 2 * y + 1);
            let d = src.get(2 * x + 1, 2 * y + 1);
            let mut px = [0.0f32; 3];
            for i in 0..3 {
                px[i] = ((a[i] + b[i] + c[i] + d[i]) / 4.0).floor();
            }
            out.set(x, y, px);
        }
    }
    out
}

/// Bilinear resize to `tw × th`, pixel-centre aligned.
pub fn resize_bilinear(src: &Grid<f32>, tw: u32, th: u32) -> Grid<f32> {
    let sw = src.width as usize;
    let sh = src.height as usize;
    let mut out = vec![0.0f32; tw as usize * th as usize];
    if sw == 0 || sh == 0 || tw == 0 || th == 0 {
        return Grid::from_vec(tw, th, out).unwrap_or_else(|| Grid::new(0, 0, 0.0));
    }
    let sx_scale = sw as f32 / tw as f32;
    let sy_scale = sh as f32 / th as f32;
    let data = src.as_slice();
    out.par_chunks_mut(tw as usize).enumerate().for_each(|(y, row_out)| {
        let fy = ((y as f32 + 0.5) * sy_scale - 0.5).clamp(0.0, (sh - 1) as f32);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let ty = fy - y0 as f32;
        for (x, out_px) in row_out.iter_mut().enumerate() {
            let fx = ((x as f32 + 0.5) * sx_scale - 0.5).clamp(0.0, (sw - 1) as f32);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let tx = fx - x0 as f32;
            let top = data[y0 * sw + x0] + tx * (data[y0 * sw + x1] - data[y0 * sw + x0]);
            let bot = data[y1 * sw + x0] + tx * (data[y1 * sw + x1] - data[y1 * sw + x0]);
            *out_px = top + ty * (bot - top);
        }
    });
    Grid::from_vec(tw, th, out).unwrap_or_else(|| Grid::new(0, 0, 0.0))
}

/// Min–max normalise to rounded integers in `0..=255`.  A flat input maps to 0.
pub fn normalize_to_u8(src: &Grid<f32>) -> Grid<u8> {
    let (min, max) = src
        .as_slice()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    let data = src
        .as_slice()
        .iter()
        .map(|&v| {
            if range > 0.0 {
                ((v - min) * 255.0 / range).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    Grid::from_vec(src.width, src.height, data).unwrap_or_else(|| Grid::new(0, 0, 0))
}
