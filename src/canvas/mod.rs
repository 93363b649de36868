// ============================================================================
// CANVAS: shared paint state and coarse-to-fine phase orchestration
// ============================================================================
//
// Two passes (compact brushes at density D, elongated brushes at 2D), each of
// five phases from the largest size bucket down to the smallest.  Candidate
// positions are always sampled on the calling thread from one seeded RNG;
// only stroke application runs on the worker pool.  Each phase is a barrier.

pub mod evaluate;
pub mod fill;
pub mod shared;
pub mod stroke;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::brush::{BrushAtlas, BrushFamily, SIZE_BUCKETS};
use crate::features::{FeatureMaps, magnitude_bucket};
use crate::grid::SourceImage;

pub use fill::FillReport;
pub use shared::{CanvasBuffer, Rgb16, SENTINEL_OFFSET, SharedCanvas, UNPAINTED};
pub use stroke::{PaintContext, StrokeCandidate, StrokeOutcome, StrokeTask};

/// Phases per pass, one per size bucket.
pub const PHASES: usize = SIZE_BUCKETS;
pub const DEFAULT_DENSITY: f64 = 0.01;
pub const DEFAULT_MAX_RETRIES: u32 = 100;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct PaintSettings {
    /// Strokes per pixel for the first compact phase.
    pub density: f64,
    /// 0 = all cores, negative = unchecked mode with `|workers|` threads.
    pub workers: i32,
    pub seed: u64,
    /// Attempts per stroke before it is dropped.
    pub max_retries: u32,
    /// Phases that render with the noisy source's colour.
    pub noisy_phases: [bool; PHASES],
}

impl Default for PaintSettings {
    fn default() -> Self {
        Self {
            density: DEFAULT_DENSITY,
            workers: 0,
            seed: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            noisy_phases: [false, false, true, true, true],
        }
    }
}

impl PaintSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !self.density.is_finite() || self.density <= 0.0 {
            return Err(format!("density must be positive, got {}", self.density));
        }
        if self.max_retries == 0 {
            return Err("max retries must be at least 1".to_string());
        }
        Ok(())
    }

    /// Version-checked commits (the default) vs. unchecked.
    pub fn checked(&self) -> bool {
        self.workers >= 0
    }

    /// Worker thread count after resolving 0 to the machine's parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers.unsigned_abs() as usize
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseStats {
    pub family: BrushFamily,
    pub phase: usize,
    /// Positions drawn from the RNG.
    pub sampled: u64,
    /// Positions whose features matched this phase.
    pub dispatched: u64,
    pub committed: u64,
    pub rejected: u64,
    pub stale_retries: u64,
    pub dropped: u64,
    pub degenerate: u64,
}

impl PhaseStats {
    fn new(family: BrushFamily, phase: usize) -> Self {
        Self {
            family,
            phase,
            sampled: 0,
            dispatched: 0,
            committed: 0,
            rejected: 0,
            stale_retries: 0,
            dropped: 0,
            degenerate: 0,
        }
    }
}

impl fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phase {}: sampled {}, dispatched {}, committed {}, rejected {}, stale retries {}, dropped {}, degenerate {}",
            self.family.label(),
            self.phase,
            self.sampled,
            self.dispatched,
            self.committed,
            self.rejected,
            self.stale_retries,
            self.dropped,
            self.degenerate
        )
    }
}

/// Outcome tally shared by the tasks of one phase.
#[derive(Default)]
struct PhaseCounters {
    committed: AtomicU64,
    rejected: AtomicU64,
    stale_retries: AtomicU64,
    dropped: AtomicU64,
    degenerate: AtomicU64,
}

impl PhaseCounters {
    fn record(&self, outcome: StrokeOutcome) {
        let (counter, retries) = match outcome {
            StrokeOutcome::Committed { retries } => (&self.committed, retries),
            StrokeOutcome::Rejected { retries } => (&self.rejected, retries),
            StrokeOutcome::Dropped { retries } => (&self.dropped, retries),
            StrokeOutcome::Degenerate => (&self.degenerate, 0),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.stale_retries.fetch_add(retries as u64, Ordering::Relaxed);
    }

    fn fill(&self, stats: &mut PhaseStats) {
        stats.committed = self.committed.load(Ordering::Relaxed);
        stats.rejected = self.rejected.load(Ordering::Relaxed);
        stats.stale_retries = self.stale_retries.load(Ordering::Relaxed);
        stats.dropped = self.dropped.load(Ordering::Relaxed);
        stats.degenerate = self.degenerate.load(Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaintReport {
    pub phases: Vec<PhaseStats>,
}

impl PaintReport {
    pub fn committed(&self) -> u64 {
        self.phases.iter().map(|p| p.committed).sum()
    }

    pub fn rejected(&self) -> u64 {
        self.phases.iter().map(|p| p.rejected).sum()
    }

    pub fn dropped(&self) -> u64 {
        self.phases.iter().map(|p| p.dropped).sum()
    }

    pub fn stale_retries(&self) -> u64 {
        self.phases.iter().map(|p| p.stale_retries).sum()
    }
}

// ============================================================================
// CANVAS
// ============================================================================

pub struct Canvas<'a> {
    ctx: PaintContext<'a>,
    features: &'a FeatureMaps,
    shared: SharedCanvas,
    rng: StdRng,
    settings: PaintSettings,
    /// `None` runs every phase on the calling thread.
    pool: Option<rayon::ThreadPool>,
}

impl<'a> Canvas<'a> {
    pub fn new(
        source: &'a SourceImage,
        noisy: Option<&'a SourceImage>,
        features: &'a FeatureMaps,
        atlas: &'a BrushAtlas,
        settings: PaintSettings,
    ) -> Result<Self, String> {
        settings.validate()?;
        let (w, h) = (source.width(), source.height());
        if w == 0 || h == 0 {
            return Err("canvas must not be empty".to_string());
        }
        if (features.width(), features.height()) != (w, h) {
            return Err(format!(
                "feature maps are {}x{}, source is {w}x{h}",
                features.width(),
                features.height()
            ));
        }
        match noisy {
            Some(n) if (n.width(), n.height()) != (w, h) => {
                return Err(format!(
                    "noisy source is {}x{}, source is {w}x{h}",
                    n.width(),
                    n.height()
                ));
            }
            _ => {}
        }

        let workers = settings.resolved_workers();
        let pool = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("stroke-worker-{i}"))
                .build()
                .map_err(|e| format!("Failed to build worker pool: {e}"))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            ctx: PaintContext {
                source,
                noisy,
                atlas,
                angles: features.brush_angles(),
            },
            features,
            shared: SharedCanvas::new(CanvasBuffer::new(w, h)),
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            pool,
        })
    }

    pub fn width(&self) -> u32 {
        self.ctx.source.width()
    }

    pub fn height(&self) -> u32 {
        self.ctx.source.height()
    }

    pub fn settings(&self) -> &PaintSettings {
        &self.settings
    }

    /// Number of threads applying strokes (1 when sequential).
    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Copy of the current pixels and versions.
    pub fn buffer(&self) -> CanvasBuffer {
        self.shared.lock().clone()
    }

    pub fn unpainted_pixels(&self) -> usize {
        self.shared.lock().unpainted_count()
    }

    /// Both passes, all phases, in order.
    pub fn paint_all(&mut self) -> PaintReport {
        let base = self.width() as f64 * self.height() as f64 * self.settings.density;
        let mut report = PaintReport::default();
        for (pass, family) in BrushFamily::all().into_iter().enumerate() {
            let density = base * (1 << pass) as f64;
            for phase in 0..PHASES {
                report.phases.push(self.paint_phase(family, phase, density));
            }
        }
        report
    }

    /// One phase: sample `round(density · 2^phase)` positions, keep those
    /// matching the phase, apply them, and wait for all of them.
    pub fn paint_phase(&mut self, family: BrushFamily, phase: usize, density: f64) -> PhaseStats {
        if phase >= PHASES {
            log_warn!("phase {phase} out of range, nothing painted");
            return PhaseStats::new(family, phase);
        }
        let count = (density * (1u64 << phase) as f64).round() as u64;
        let mut stats = PhaseStats::new(family, phase);
        stats.sampled = count;

        let candidates = self.sample_candidates(family, phase, count);
        stats.dispatched = candidates.len() as u64;
        self.apply_candidates(&candidates).fill(&mut stats);

        log_info!("{stats}");
        stats
    }

    /// Draw `count` positions and keep those whose magnitude bucket is
    /// `phase` and whose region class suits `family`.
    pub fn sample_candidates(
        &mut self,
        family: BrushFamily,
        phase: usize,
        count: u64,
    ) -> Vec<StrokeCandidate> {
        let Some(&noisy_phase) = self.settings.noisy_phases.get(phase) else {
            return Vec::new();
        };
        let (w, h) = (self.width(), self.height());
        let noisy = self.ctx.noisy.is_some() && noisy_phase;
        let mut candidates = Vec::new();
        for _ in 0..count {
            let x = self.rng.gen_range(0..w);
            let y = self.rng.gen_range(0..h);
            if magnitude_bucket(self.features.magnitude(x, y)) != phase
                || !self.features.region_class(x, y).matches(family)
            {
                continue;
            }
            candidates.push(StrokeCandidate {
                family,
                size: PHASES - 1 - phase,
                angle: self.features.orientation(x, y),
                x: x as i64,
                y: y as i64,
                noisy,
            });
        }
        candidates
    }

    fn apply_candidates(&self, candidates: &[StrokeCandidate]) -> PhaseCounters {
        let counters = PhaseCounters::default();
        let ctx = self.ctx;
        let shared = &self.shared;
        let checked = self.settings.checked();
        let max_retries = self.settings.max_retries;

        match &self.pool {
            None => {
                for candidate in candidates {
                    counters.record(apply_candidate(candidate, &ctx, shared, checked, max_retries));
                }
            }
            Some(pool) => {
                let counters = &counters;
                pool.scope(|s| {
                    for candidate in candidates {
                        s.spawn(move |_| {
                            counters.record(apply_candidate(
                                candidate,
                                &ctx,
                                shared,
                                checked,
                                max_retries,
                            ));
                        });
                    }
                });
            }
        }
        counters
    }

    /// Flood-fill every pixel no stroke reached.
    pub fn fill_unpainted(&mut self) -> FillReport {
        let report = fill::fill_unpainted(self.shared.get_mut(), self.ctx.source);
        log_info!("fill: {} regions, {} pixels", report.regions, report.pixels);
        report
    }

    /// Remove the offset and clamp to an 8-bit image.
    pub fn finalize(&self) -> RgbImage {
        finalize_buffer(&self.shared.lock())
    }
}

fn apply_candidate(
    candidate: &StrokeCandidate,
    ctx: &PaintContext<'_>,
    shared: &SharedCanvas,
    checked: bool,
    max_retries: u32,
) -> StrokeOutcome {
    match StrokeTask::prepare(candidate, ctx) {
        Some(task) => task.apply(shared, ctx.source, checked, max_retries),
        None => StrokeOutcome::Degenerate,
    }
}

/// `clamp(canvas − 1, 0, 255)` per channel; unpainted pixels become black.
pub fn finalize_buffer(buffer: &CanvasBuffer) -> RgbImage {
    let (w, h) = (buffer.width(), buffer.height());
    let mut out = RgbImage::new(w, h);
    let row_bytes = w as usize * 3;
    if row_bytes == 0 {
        return out;
    }
    let pixels = buffer.pixels();
    out.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &pixels[y * w as usize..(y + 1) * w as usize];
            for (dst, p) in row.chunks_exact_mut(3).zip(src_row) {
                for c in 0..3 {
                    dst[c] = (p[c] as i32 - SENTINEL_OFFSET as i32).clamp(0, 255) as u8;
                }
            }
        });
    out
}
