// ============================================================================
// STROKE TASK: optimistic snapshot / simulate / commit
// ============================================================================
//
// A stroke never holds the canvas lock while painting.  It:
//   1. snapshots the versions and pixels of its bounding box (locked)
//   2. paints its colour onto the private pixel copy (unlocked)
//   3. re-locks, checks the versions, and evaluates old vs. new error
//   4. on improvement bumps the box's versions and writes the masked pixels
// A version mismatch in step 3 means another stroke committed over the box
// in between; the whole attempt is retried from step 1.

use crate::brush::{BrushAtlas, BrushFamily, BrushMask};
use crate::canvas::evaluate::{absolute_error, improves, masked_mean, masked_pixels};
use crate::canvas::shared::{Rgb16, SharedCanvas};
use crate::features::nearest_angle_index;
use crate::grid::{Region, SourceImage};

/// One sampled stroke position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeCandidate {
    pub family: BrushFamily,
    /// Size bucket, 0 = smallest.
    pub size: usize,
    /// Edge orientation at the sample point, radians.
    pub angle: f64,
    pub x: i64,
    pub y: i64,
    /// Paint with the mean of the noisy source instead of the clean one.
    pub noisy: bool,
}

/// Read-only inputs shared by every stroke of a run.
#[derive(Clone, Copy, Debug)]
pub struct PaintContext<'a> {
    pub source: &'a SourceImage,
    pub noisy: Option<&'a SourceImage>,
    pub atlas: &'a BrushAtlas,
    pub angles: &'a [f64],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Rejected,
    /// Versions moved since the snapshot; nothing was evaluated.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeOutcome {
    Committed { retries: u32 },
    Rejected { retries: u32 },
    /// Gave up after the retry limit.
    Dropped { retries: u32 },
    /// Mask covers no canvas pixel; nothing to paint.
    Degenerate,
}

/// Private copy of a bounding box, reused across retries.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub versions: Vec<u32>,
    pub pixels: Vec<Rgb16>,
    /// Scratch for the live pixels read during commit.
    pub current: Vec<Rgb16>,
}

#[derive(Clone, Debug)]
pub struct StrokeTask<'a> {
    mask: &'a BrushMask,
    region: Region,
    origin: (i64, i64),
    color: Rgb16,
    render_color: Rgb16,
}

impl<'a> StrokeTask<'a> {
    /// Resolve mask, bounding box and colour.  `None` for degenerate strokes
    /// (box fully off-canvas, or mask covering no in-bounds pixel).
    pub fn prepare(candidate: &StrokeCandidate, ctx: &PaintContext<'a>) -> Option<Self> {
        let orientation = nearest_angle_index(ctx.angles, candidate.angle);
        let mask = ctx.atlas.mask(candidate.family, candidate.size, orientation);
        let (region, origin) = Region::centered_square(
            candidate.x,
            candidate.y,
            mask.side(),
            ctx.source.width(),
            ctx.source.height(),
        )?;
        let color = masked_mean(ctx.source, region, origin, mask)?;
        let render_color = match ctx.noisy {
            Some(noisy) if candidate.noisy => {
                masked_mean(noisy, region, origin, mask).unwrap_or(color)
            }
            _ => color,
        };
        Some(Self {
            mask,
            region,
            origin,
            color,
            render_color,
        })
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Offset mean of the clean source under the mask.
    pub fn color(&self) -> Rgb16 {
        self.color
    }

    /// Colour actually written on commit.
    pub fn render_color(&self) -> Rgb16 {
        self.render_color
    }

    /// Copy the bounding box out of the canvas.  Unchecked tasks skip the
    /// version copy.
    pub fn snapshot_into(&self, shared: &SharedCanvas, checked: bool, snap: &mut Snapshot) {
        let buf = shared.lock();
        if checked {
            buf.copy_versions(self.region, &mut snap.versions);
        } else {
            snap.versions.clear();
        }
        buf.copy_pixels(self.region, &mut snap.pixels);
    }

    pub fn snapshot(&self, shared: &SharedCanvas, checked: bool) -> Snapshot {
        let mut snap = Snapshot::default();
        self.snapshot_into(shared, checked, &mut snap);
        snap
    }

    /// Paint the evaluation colour onto the snapshot's pixel copy.
    pub fn simulate(&self, snap: &mut Snapshot) {
        for (x, y) in masked_pixels(self.region, self.origin, self.mask) {
            snap.pixels[self.region.local_index(x, y)] = self.color;
        }
    }

    /// Validate and evaluate under the lock; write on improvement.
    pub fn try_commit(
        &self,
        shared: &SharedCanvas,
        source: &SourceImage,
        snap: &mut Snapshot,
        checked: bool,
    ) -> CommitOutcome {
        let mut buf = shared.lock();
        if checked && !buf.versions_match(self.region, &snap.versions) {
            return CommitOutcome::Stale;
        }

        buf.copy_pixels(self.region, &mut snap.current);
        let old_error = absolute_error(source, self.region, &snap.current);
        let new_error = absolute_error(source, self.region, &snap.pixels);
        if !improves(old_error, new_error) {
            return CommitOutcome::Rejected;
        }

        buf.bump_versions(self.region);
        buf.paint_masked(self.region, self.origin, self.mask, self.render_color);
        CommitOutcome::Committed
    }

    /// Full protocol with at most `max_retries` attempts.
    pub fn apply(
        &self,
        shared: &SharedCanvas,
        source: &SourceImage,
        checked: bool,
        max_retries: u32,
    ) -> StrokeOutcome {
        self.apply_with(shared, source, checked, max_retries, |_, _| {})
    }

    /// `apply` with a hook run between simulate and commit.
    fn apply_with<F>(
        &self,
        shared: &SharedCanvas,
        source: &SourceImage,
        checked: bool,
        max_retries: u32,
        mut between_simulate_and_commit: F,
    ) -> StrokeOutcome
    where
        F: FnMut(&SharedCanvas, Region),
    {
        let mut snap = Snapshot::default();
        let mut retries = 0;
        while retries < max_retries {
            self.snapshot_into(shared, checked, &mut snap);
            self.simulate(&mut snap);
            between_simulate_and_commit(shared, self.region);
            match self.try_commit(shared, source, &mut snap, checked) {
                CommitOutcome::Committed => return StrokeOutcome::Committed { retries },
                CommitOutcome::Rejected => return StrokeOutcome::Rejected { retries },
                CommitOutcome::Stale => retries += 1,
            }
        }
        StrokeOutcome::Dropped { retries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::{BrushMask, SIZE_BUCKETS};
    use crate::canvas::shared::{CanvasBuffer, UNPAINTED};
    use std::sync::Arc;
    use std::thread;

    fn atlas_of_side(side: u32) -> BrushAtlas {
        BrushAtlas::from_fn(|_, _, _| BrushMask::full(side))
    }

    fn ctx<'a>(src: &'a SourceImage, atlas: &'a BrushAtlas) -> PaintContext<'a> {
        PaintContext {
            source: src,
            noisy: None,
            atlas,
            angles: atlas.angles(),
        }
    }

    fn candidate(x: i64, y: i64) -> StrokeCandidate {
        StrokeCandidate {
            family: BrushFamily::Compact,
            size: SIZE_BUCKETS - 1,
            angle: 0.0,
            x,
            y,
            noisy: false,
        }
    }

    #[test]
    fn single_pixel_stroke_commits_source_colour() {
        // 1×1 canvas, 1×1 brush.
        let src = SourceImage::filled(1, 1, [10, 20, 30]);
        let atlas = atlas_of_side(1);
        let shared = SharedCanvas::new(CanvasBuffer::new(1, 1));
        let task = StrokeTask::prepare(&candidate(0, 0), &ctx(&src, &atlas)).unwrap();
        assert_eq!(task.color(), [11, 21, 31]);

        let outcome = task.apply(&shared, &src, true, 100);
        assert_eq!(outcome, StrokeOutcome::Committed { retries: 0 });
        let buf = shared.into_inner();
        assert_eq!(buf.pixel(0, 0), [11, 21, 31]);
        assert_eq!(buf.version(0, 0), 1);
    }

    #[test]
    fn repainting_identical_colour_is_rejected() {
        let src = SourceImage::filled(1, 1, [10, 20, 30]);
        let atlas = atlas_of_side(1);
        let shared = SharedCanvas::new(CanvasBuffer::new(1, 1));
        let task = StrokeTask::prepare(&candidate(0, 0), &ctx(&src, &atlas)).unwrap();
        task.apply(&shared, &src, true, 100);
        assert_eq!(
            task.apply(&shared, &src, true, 100),
            StrokeOutcome::Rejected { retries: 0 }
        );
        assert_eq!(shared.lock().version(0, 0), 1);
    }

    #[test]
    fn fully_off_canvas_stroke_is_degenerate() {
        let src = SourceImage::filled(4, 4, [1, 1, 1]);
        let atlas = atlas_of_side(3);
        assert!(StrokeTask::prepare(&candidate(-10, 2), &ctx(&src, &atlas)).is_none());
    }

    #[test]
    fn empty_mask_is_degenerate() {
        let src = SourceImage::filled(4, 4, [1, 1, 1]);
        let atlas = BrushAtlas::from_fn(|_, _, _| BrushMask::empty(3));
        assert!(StrokeTask::prepare(&candidate(2, 2), &ctx(&src, &atlas)).is_none());
    }

    #[test]
    fn noisy_candidate_writes_noisy_mean() {
        let src = SourceImage::filled(1, 1, [100, 100, 100]);
        let noisy = SourceImage::filled(1, 1, [110, 90, 100]);
        let atlas = atlas_of_side(1);
        let mut c = ctx(&src, &atlas);
        c.noisy = Some(&noisy);
        let mut cand = candidate(0, 0);
        cand.noisy = true;
        let task = StrokeTask::prepare(&cand, &c).unwrap();
        assert_eq!(task.color(), [101, 101, 101]);
        assert_eq!(task.render_color(), [111, 91, 101]);

        let shared = SharedCanvas::new(CanvasBuffer::new(1, 1));
        task.apply(&shared, &src, true, 100);
        assert_eq!(shared.lock().pixel(0, 0), [111, 91, 101]);
    }

    #[test]
    fn conflicting_commit_forces_reevaluation() {
        // Stroke A snapshots, stroke B commits over the same box, A must
        // not overwrite B on the strength of its stale baseline.
        let mut src = SourceImage::filled(2, 1, [0, 0, 0]);
        src.set(0, 0, [100, 100, 100]);
        src.set(1, 0, [200, 200, 200]);
        let atlas = atlas_of_side(2);
        let shared = SharedCanvas::new(CanvasBuffer::new(2, 1));

        let a = StrokeTask::prepare(&candidate(1, 0), &ctx(&src, &atlas)).unwrap();
        let mut snap = a.snapshot(&shared, true);
        a.simulate(&mut snap);

        // B writes exact source colours over the whole box.
        {
            let mut buf = shared.lock();
            buf.bump_versions(a.region());
            buf.set_pixel(0, 0, [101, 101, 101]);
            buf.set_pixel(1, 0, [201, 201, 201]);
        }

        assert_eq!(a.try_commit(&shared, &src, &mut snap, true), CommitOutcome::Stale);
        assert_eq!(shared.lock().pixel(0, 0), [101, 101, 101]);

        // Retrying from a fresh snapshot evaluates against B's result and
        // rejects A's blended colour.
        assert_eq!(
            a.apply(&shared, &src, true, 100),
            StrokeOutcome::Rejected { retries: 0 }
        );
        let buf = shared.into_inner();
        assert_eq!(buf.pixel(1, 0), [201, 201, 201]);
        assert_eq!(buf.version(0, 0), 1);
    }

    #[test]
    fn unchecked_commit_ignores_version_moves() {
        let src = SourceImage::filled(1, 1, [40, 40, 40]);
        let atlas = atlas_of_side(1);
        let shared = SharedCanvas::new(CanvasBuffer::new(1, 1));
        let task = StrokeTask::prepare(&candidate(0, 0), &ctx(&src, &atlas)).unwrap();

        let mut snap = task.snapshot(&shared, false);
        assert!(snap.versions.is_empty());
        task.simulate(&mut snap);
        shared.lock().bump_versions(task.region());
        assert_eq!(task.try_commit(&shared, &src, &mut snap, false), CommitOutcome::Committed);
        assert_eq!(shared.lock().version(0, 0), 2);
    }

    #[test]
    fn zero_retry_budget_drops() {
        let src = SourceImage::filled(1, 1, [40, 40, 40]);
        let atlas = atlas_of_side(1);
        let shared = SharedCanvas::new(CanvasBuffer::new(1, 1));
        let task = StrokeTask::prepare(&candidate(0, 0), &ctx(&src, &atlas)).unwrap();
        assert_eq!(task.apply(&shared, &src, true, 0), StrokeOutcome::Dropped { retries: 0 });
        assert_eq!(shared.into_inner().pixel(0, 0), UNPAINTED);
    }

    #[test]
    fn exhausted_retries_drop_the_stroke() {
        // Another writer moves the box's versions on every attempt.
        let src = SourceImage::filled(3, 3, [40, 40, 40]);
        let atlas = atlas_of_side(2);
        let shared = SharedCanvas::new(CanvasBuffer::new(3, 3));
        let task = StrokeTask::prepare(&candidate(1, 1), &ctx(&src, &atlas)).unwrap();
        let region = task.region();

        let mut bumps = 0;
        let outcome = task.apply_with(&shared, &src, true, 3, |s, r| {
            s.lock().bump_versions(r);
            bumps += 1;
        });
        assert_eq!(outcome, StrokeOutcome::Dropped { retries: 3 });
        assert_eq!(bumps, 3);

        let buf = shared.into_inner();
        assert!(buf.pixels().iter().all(|&p| p == UNPAINTED));
        for y in 0..3 {
            for x in 0..3 {
                let inside = x >= region.x0 && x < region.x1 && y >= region.y0 && y < region.y1;
                assert_eq!(buf.version(x, y), if inside { 3 } else { 0 });
            }
        }
    }

    #[test]
    fn commit_reuses_snapshot_scratch() {
        let src = SourceImage::filled(2, 2, [40, 40, 40]);
        let atlas = atlas_of_side(2);
        let shared = SharedCanvas::new(CanvasBuffer::new(2, 2));
        let task = StrokeTask::prepare(&candidate(1, 1), &ctx(&src, &atlas)).unwrap();

        let mut snap = task.snapshot(&shared, true);
        task.simulate(&mut snap);
        assert_eq!(task.try_commit(&shared, &src, &mut snap, true), CommitOutcome::Committed);
        assert_eq!(snap.current, vec![UNPAINTED; task.region().area()]);
        let scratch = snap.current.as_ptr();

        task.snapshot_into(&shared, true, &mut snap);
        task.simulate(&mut snap);
        assert_eq!(task.try_commit(&shared, &src, &mut snap, true), CommitOutcome::Rejected);
        assert_eq!(snap.current.as_ptr(), scratch);
        assert!(snap.current.iter().all(|&p| p == [41, 41, 41]));
    }

    #[test]
    fn two_threads_on_one_pixel_commit_exactly_once() {
        // Both strokes want the same colour; whichever commits second sees
        // no improvement.
        let src = Arc::new(SourceImage::filled(1, 1, [5, 6, 7]));
        let atlas = Arc::new(atlas_of_side(1));
        let shared = Arc::new(SharedCanvas::new(CanvasBuffer::new(1, 1)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (src, atlas, shared) = (src.clone(), atlas.clone(), shared.clone());
                thread::spawn(move || {
                    let task = StrokeTask::prepare(&candidate(0, 0), &ctx(&src, &atlas)).unwrap();
                    task.apply(&shared, &src, true, 100)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let committed = outcomes
            .iter()
            .filter(|o| matches!(o, StrokeOutcome::Committed { .. }))
            .count();
        assert_eq!(committed, 1);
        let buf = shared.lock();
        assert_eq!(buf.pixel(0, 0), [6, 7, 8]);
        assert_eq!(buf.version(0, 0), 1);
    }

    #[test]
    fn overlapping_threads_never_tear_pixels() {
        // Left half black, right half white; a 2×2 stroke on each half
        // overlapping in the middle column pair.
        let mut src = SourceImage::filled(4, 2, [0, 0, 0]);
        for y in 0..2 {
            for x in 2..4 {
                src.set(x, y, [250, 250, 250]);
            }
        }
        let src = Arc::new(src);
        let atlas = Arc::new(atlas_of_side(2));

        for _ in 0..20 {
            let shared = Arc::new(SharedCanvas::new(CanvasBuffer::new(4, 2)));
            let handles: Vec<_> = [(1, 1), (2, 1), (3, 1)]
                .into_iter()
                .map(|(x, y)| {
                    let (src, atlas, shared) = (src.clone(), atlas.clone(), shared.clone());
                    thread::spawn(move || {
                        let task =
                            StrokeTask::prepare(&candidate(x, y), &ctx(&src, &atlas)).unwrap();
                        task.apply(&shared, &src, true, 100)
                    })
                })
                .collect();
            for h in handles {
                assert!(!matches!(h.join().unwrap(), StrokeOutcome::Dropped { .. }));
            }

            // Every pixel is either unpainted or one of the three stroke
            // colours, never a channel mix.
            let allowed = [UNPAINTED, [1, 1, 1], [126, 126, 126], [251, 251, 251]];
            let buf = shared.lock();
            for &p in buf.pixels() {
                assert!(allowed.contains(&p), "torn pixel {p:?}");
            }
            assert!(buf.versions().iter().all(|&v| v >= 1));
        }
    }
}
