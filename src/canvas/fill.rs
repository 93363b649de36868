use std::collections::VecDeque;

use crate::canvas::shared::{CanvasBuffer, Rgb16, SENTINEL_OFFSET, UNPAINTED};
use crate::grid::SourceImage;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Connected unpainted regions found.
    pub regions: usize,
    /// Pixels written.
    pub pixels: usize,
}

/// 4-connected components of unpainted pixels, each as a list of
/// coordinates in BFS order.
pub fn unpainted_regions(buffer: &CanvasBuffer) -> Vec<Vec<(u32, u32)>> {
    let (w, h) = (buffer.width(), buffer.height());
    let mut visited = vec![false; w as usize * h as usize];
    let mut regions = Vec::new();
    let mut queue = VecDeque::with_capacity(1024);

    for sy in 0..h {
        for sx in 0..w {
            let start = (sy * w + sx) as usize;
            if visited[start] || buffer.pixel(sx, sy) != UNPAINTED {
                continue;
            }
            visited[start] = true;
            queue.push_back((sx, sy));
            let mut region = Vec::new();

            while let Some((px, py)) = queue.pop_front() {
                region.push((px, py));
                let neighbors = [
                    (px.wrapping_sub(1), py),
                    (px + 1, py),
                    (px, py.wrapping_sub(1)),
                    (px, py + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx >= w || ny >= h {
                        continue;
                    }
                    let idx = (ny * w + nx) as usize;
                    if visited[idx] || buffer.pixel(nx, ny) != UNPAINTED {
                        continue;
                    }
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
            regions.push(region);
        }
    }
    regions
}

/// Paint every unpainted region with the (truncated) mean source colour over
/// its pixels.  Versions are left alone: fills are not strokes.
pub fn fill_unpainted(buffer: &mut CanvasBuffer, source: &SourceImage) -> FillReport {
    let regions = unpainted_regions(buffer);
    let mut report = FillReport {
        regions: regions.len(),
        pixels: 0,
    };
    for region in regions {
        let mut sum = [0u64; 3];
        for &(x, y) in &region {
            let px = source.get(x, y);
            for c in 0..3 {
                sum[c] += px[c] as u64;
            }
        }
        let n = region.len() as u64;
        let color: Rgb16 = sum.map(|s| (s / n) as u16 + SENTINEL_OFFSET);
        for &(x, y) in &region {
            buffer.set_pixel(x, y, color);
        }
        report.pixels += region.len();
    }
    report
}
