use relaxpaint::brush::{BrushAtlas, BrushFamily, BrushMask};
use relaxpaint::canvas::evaluate::absolute_error;
use relaxpaint::canvas::{
    Canvas, PHASES, PaintContext, PaintSettings, StrokeCandidate, StrokeTask, UNPAINTED,
};
use relaxpaint::features::{FeatureMaps, RegionClass};
use relaxpaint::grid::{Grid, Region, SourceImage};

// ============================================================================
// Helpers
// ============================================================================

fn disc(side: u32) -> BrushMask {
    let r = side as f32 / 2.0;
    BrushMask::from_fn(side, |x, y| {
        let dx = x as f32 + 0.5 - r;
        let dy = y as f32 + 0.5 - r;
        dx * dx + dy * dy <= r * r
    })
}

fn bar(side: u32) -> BrushMask {
    BrushMask::from_fn(side, |_, y| y + 2 >= side / 2 && y <= side / 2 + 1)
}

/// Warm disc on a cool gradient.
fn still_life(w: u32, h: u32) -> SourceImage {
    let mut src = SourceImage::filled(w, h, [0, 0, 0]);
    let (cx, cy, r) = (w as f32 * 0.6, h as f32 * 0.4, w.min(h) as f32 * 0.3);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let px = if dx * dx + dy * dy < r * r {
                [230, 140, 40]
            } else {
                [20, (60 + 3 * y).min(255) as u8, (120 + 2 * x).min(255) as u8]
            };
            src.set(x, y, px);
        }
    }
    src
}

fn flat_features(w: u32, h: u32) -> FeatureMaps {
    FeatureMaps::from_parts(
        Grid::new(w, h, 0),
        Grid::new(w, h, 0.0),
        Grid::new(w, h, RegionClass::Lo),
    )
    .unwrap()
}

fn whole(src: &SourceImage) -> Region {
    Region {
        x0: 0,
        y0: 0,
        x1: src.width(),
        y1: src.height(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn sequential_runs_are_reproducible() {
    let src = still_life(40, 32);
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(10), &bar(12), 1.0);
    let settings = PaintSettings {
        density: 0.05,
        workers: 1,
        seed: 1234,
        ..PaintSettings::default()
    };

    let render = || {
        let mut canvas = Canvas::new(&src, None, &features, &atlas, settings.clone()).unwrap();
        let report = canvas.paint_all();
        (report, canvas.buffer())
    };
    let (report_a, buf_a) = render();
    let (report_b, buf_b) = render();
    assert_eq!(report_a, report_b);
    assert_eq!(buf_a, buf_b);
    assert!(report_a.committed() > 0);
}

#[test]
fn different_seeds_sample_different_strokes() {
    let src = still_life(40, 32);
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(10), &bar(12), 1.0);
    let paint = |seed| {
        let settings = PaintSettings { density: 0.05, workers: 1, seed, ..PaintSettings::default() };
        let mut canvas = Canvas::new(&src, None, &features, &atlas, settings).unwrap();
        canvas.paint_all();
        canvas.buffer()
    };
    assert_ne!(paint(1), paint(2));
}

#[test]
fn error_and_versions_never_go_backwards() {
    let src = still_life(48, 48);
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(12), &bar(14), 1.0);
    for workers in [1, 4] {
        let settings = PaintSettings { density: 0.03, workers, seed: 77, ..PaintSettings::default() };
        let mut canvas = Canvas::new(&src, None, &features, &atlas, settings).unwrap();
        let base = 48.0 * 48.0 * 0.03;

        let mut prev = canvas.buffer();
        for (pass, family) in BrushFamily::all().into_iter().enumerate() {
            for phase in 0..PHASES {
                let stats = canvas.paint_phase(family, phase, base * (1 << pass) as f64);
                let next = canvas.buffer();
                let before = absolute_error(&src, whole(&src), prev.pixels());
                let after = absolute_error(&src, whole(&src), next.pixels());
                if stats.committed > 0 {
                    assert!(after < before, "workers {workers}: {stats}");
                } else {
                    assert_eq!(after, before);
                }
                for (old, new) in prev.versions().iter().zip(next.versions()) {
                    assert!(new >= old);
                }
                prev = next;
            }
        }
    }
}

#[test]
fn unchecked_mode_still_commits_whole_strokes() {
    let src = still_life(48, 48);
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(12), &bar(14), 1.0);
    let settings = PaintSettings { density: 0.03, workers: -4, seed: 77, ..PaintSettings::default() };
    let mut canvas = Canvas::new(&src, None, &features, &atlas, settings).unwrap();
    assert_eq!(canvas.workers(), 4);

    let report = canvas.paint_all();
    assert!(report.committed() > 0);
    assert_eq!(report.stale_retries(), 0);
    assert_eq!(report.dropped(), 0);
    let buf = canvas.buffer();
    for (p, v) in buf.pixels().iter().zip(buf.versions()) {
        if *p != UNPAINTED {
            assert!(*v >= 1);
        }
    }
}

#[test]
fn single_stroke_on_uniform_patch() {
    // 2×2 patch at (1..3, 1..3) on a different background.  Only the patch
    // centre (2, 2) accepts a compact stroke; elongated masks are empty.
    let mut src = SourceImage::filled(4, 4, [10, 200, 30]);
    for y in 1..3 {
        for x in 1..3 {
            src.set(x, y, [100, 50, 25]);
        }
    }
    let mut region = Grid::new(4, 4, RegionClass::Hi);
    region.set(2, 2, RegionClass::Lo);
    let features =
        FeatureMaps::from_parts(Grid::new(4, 4, 0), Grid::new(4, 4, 0.0), region).unwrap();
    let atlas = BrushAtlas::from_fn(|family, _, _| match family {
        BrushFamily::Compact => BrushMask::full(2),
        BrushFamily::Elongated => BrushMask::empty(2),
    });
    // 256 draws make missing (2, 2) practically impossible.
    let settings = PaintSettings {
        density: 16.0,
        workers: 1,
        seed: 2024,
        ..PaintSettings::default()
    };
    let mut canvas = Canvas::new(&src, None, &features, &atlas, settings).unwrap();
    let report = canvas.paint_all();
    assert_eq!(report.committed(), 1);

    let buf = canvas.buffer();
    for y in 0..4 {
        for x in 0..4 {
            let on_patch = (1..3).contains(&x) && (1..3).contains(&y);
            if on_patch {
                assert_eq!(buf.pixel(x, y), [101, 51, 26], "({x}, {y})");
                assert_eq!(buf.version(x, y), 1);
            } else {
                assert_eq!(buf.pixel(x, y), UNPAINTED, "({x}, {y})");
                assert_eq!(buf.version(x, y), 0);
            }
        }
    }
}

#[test]
fn stroke_outside_canvas_is_skipped() {
    let src = SourceImage::filled(4, 4, [80, 40, 20]);
    let atlas = BrushAtlas::from_fn(|_, _, _| BrushMask::full(2));
    let ctx = PaintContext {
        source: &src,
        noisy: None,
        atlas: &atlas,
        angles: atlas.angles(),
    };
    let candidate = StrokeCandidate {
        family: BrushFamily::Compact,
        size: 4,
        angle: 0.0,
        x: -20,
        y: 50,
        noisy: false,
    };
    assert!(StrokeTask::prepare(&candidate, &ctx).is_none());
}

#[test]
fn fill_leaves_no_unpainted_pixel() {
    let src = still_life(36, 30);
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(8), &bar(10), 1.0);
    let settings = PaintSettings { density: 0.005, workers: 2, seed: 5, ..PaintSettings::default() };
    let mut canvas = Canvas::new(&src, None, &features, &atlas, settings).unwrap();
    canvas.paint_all();
    let gaps = canvas.unpainted_pixels();

    let fill = canvas.fill_unpainted();
    assert_eq!(fill.pixels, gaps);
    assert_eq!(canvas.unpainted_pixels(), 0);
    assert!(canvas.buffer().pixels().iter().all(|&p| p != UNPAINTED));

    let img = canvas.finalize();
    assert_eq!(img.dimensions(), (36, 30));
}

#[test]
fn noisy_source_changes_only_render_colours() {
    let src = still_life(32, 32);
    let noisy = relaxpaint::ops::noise::add_gaussian_noise(&src, 25.0, 9).unwrap();
    let features = FeatureMaps::extract(&src);
    let atlas = BrushAtlas::build(&disc(10), &bar(12), 1.0);
    let settings = PaintSettings { density: 0.05, workers: 1, seed: 9, ..PaintSettings::default() };

    let mut clean = Canvas::new(&src, None, &features, &atlas, settings.clone()).unwrap();
    let mut with_noise = Canvas::new(&src, Some(&noisy), &features, &atlas, settings).unwrap();
    let a = clean.paint_all();
    let b = with_noise.paint_all();

    // Same positions sampled and dispatched either way.
    for (pa, pb) in a.phases.iter().zip(&b.phases) {
        assert_eq!(pa.sampled, pb.sampled);
        assert_eq!(pa.dispatched, pb.dispatched);
    }
    // Coarse phases never use the noisy colour.
    let (c0, n0) = (&a.phases[0], &b.phases[0]);
    assert_eq!(c0.committed, n0.committed);
}
