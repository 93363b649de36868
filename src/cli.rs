// ============================================================================
// relaxpaint CLI: render photographs as stroke paintings
// ============================================================================
//
// Usage examples:
//   relaxpaint -i photo.png --compact-brush dab.png --elongated-brush line.png
//   relaxpaint -i "shots/*.jpg" --compact-brush dab.png --elongated-brush line.png \
//              -d 0.02 -r 42 -n 12 -g 2 --output-dir out/
//   relaxpaint -i photo.png ... -t -8        (8 threads, unchecked commits)
//
// Per input `<stem>` this writes `<stem>-raw.png` (strokes only),
// `<stem>-result.png` (gaps filled), `<stem>-noisy.png` with --noise, and
// `-raw-blur.png` / `-result-blur.png` with --blur.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;

use crate::brush::{BrushAtlas, BrushMask};
use crate::canvas::{Canvas, DEFAULT_DENSITY, DEFAULT_MAX_RETRIES, PaintReport, PaintSettings};
use crate::features::FeatureMaps;
use crate::io::{load_atlas_cache, load_brush_mask, load_source_image, save_atlas_cache, save_png};
use crate::ops::filters::gaussian_blur_rgb;
use crate::ops::noise::add_gaussian_noise;

/// Larger inputs need `--force`.
pub const MAX_INPUT_SIDE: u32 = 1500;
pub const MAX_BRUSH_SIDE: u32 = 500;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "relaxpaint",
    version,
    about = "Paint photographs with greedy, edge-guided brush strokes",
    long_about = "Places compact strokes in flat regions and elongated strokes along\n\
                  detail, coarse to fine, keeping only strokes that bring the canvas\n\
                  closer to the photograph. Unreached pixels are flood-filled.\n\n\
                  Example:\n  \
                  relaxpaint -i photo.png --compact-brush dab.png --elongated-brush line.png -r 7"
)]
pub struct CliArgs {
    /// Input image(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Brush image for flat regions; dark pixels are brush.
    #[arg(long, value_name = "IMAGE")]
    pub compact_brush: PathBuf,

    /// Brush image for detailed regions; dark pixels are brush.
    #[arg(long, value_name = "IMAGE")]
    pub elongated_brush: PathBuf,

    /// Strokes per pixel sampled in the first phase.
    #[arg(short, long, default_value_t = DEFAULT_DENSITY)]
    pub density: f64,

    /// Random seed. Derived from the clock (and printed) when omitted.
    #[arg(short = 'r', long)]
    pub seed: Option<u64>,

    /// Scale factor applied to both brush images.
    #[arg(short, long, default_value_t = 1.0)]
    pub scale: f32,

    /// Standard deviation of Gaussian noise for the colour of small strokes.
    #[arg(short, long, value_name = "SIGMA", allow_negative_numbers = true)]
    pub noise: Option<f64>,

    /// Worker threads: 0 = all cores, negative = |n| threads without
    /// version checks (faster, not reproducible).
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub threads: i32,

    /// Attempts per stroke before giving up on it.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub retries: u32,

    /// Also write Gaussian-blurred copies with this sigma (0 = off).
    #[arg(short = 'g', long, default_value_t = 0, value_name = "SIGMA")]
    pub blur: u32,

    /// Output directory. Defaults to each input's directory.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Reuse (or create) a cached brush atlas at this path.
    #[arg(long, value_name = "FILE")]
    pub atlas_cache: Option<PathBuf>,

    /// Accept inputs above the size limits.
    #[arg(short, long)]
    pub force: bool,

    /// Write the run log here instead of the per-user data directory.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Print per-phase statistics and timings.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Checks that do not need any file.
    pub fn validate(&self) -> Result<(), String> {
        if !self.density.is_finite() || self.density <= 0.0 {
            return Err(format!("density must be positive, got {}", self.density));
        }
        if let Some(sigma) = self.noise
            && (!sigma.is_finite() || sigma <= 0.0)
        {
            return Err(format!("noise sigma must be positive, got {}", sigma));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(format!("brush scale must be positive, got {}", self.scale));
        }
        if self.retries == 0 {
            return Err("--retries must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn paint_settings(&self, seed: u64) -> PaintSettings {
        PaintSettings {
            density: self.density,
            workers: self.threads,
            seed,
            max_retries: self.retries,
            ..PaintSettings::default()
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all inputs and return an OS exit code.
/// `0` = every file succeeded, `1` = argument error or any file failed.
pub fn run(args: CliArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        eprintln!("error: {}", e);
        log_err!("{}", e);
        return ExitCode::FAILURE;
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let seed = args.seed.unwrap_or_else(clock_seed);
    println!("Random seed is set to {}", seed);
    log_info!("seed {}", seed);

    let atlas_start = Instant::now();
    let atlas = match prepare_atlas(&args) {
        Ok(atlas) => atlas,
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        println!(
            "Brush atlas ready ({:.0}ms)",
            atlas_start.elapsed().as_secs_f64() * 1000.0
        );
    }

    let settings = args.paint_settings(seed);
    let total = inputs.len();
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        println!("[{}/{}] {}", idx + 1, total, input_path.display());
        let file_start = Instant::now();

        match run_one(input_path, &args, &atlas, &settings) {
            Ok(written) => {
                for path in &written {
                    println!("  → {}", path.display());
                }
                if args.verbose {
                    println!(
                        "  done ({:.0}ms)",
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                log_err!("{}: {}", input_path.display(), e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Brush atlas
// ============================================================================

fn load_brush(path: &Path, force: bool) -> Result<BrushMask, String> {
    let (mask, largest) = load_brush_mask(path)?;
    if largest == 0 {
        return Err(format!("brush {} has a size of 0", path.display()));
    }
    if largest > MAX_BRUSH_SIDE {
        let msg = format!(
            "brush {} is {} px, maximum is {} px",
            path.display(),
            largest,
            MAX_BRUSH_SIDE
        );
        if !force {
            return Err(format!("{} (use --force to proceed)", msg));
        }
        eprintln!("warning: {}", msg);
        log_warn!("{}", msg);
    }
    Ok(mask)
}

/// Load both brushes and build (or reuse a cached) atlas.
fn prepare_atlas(args: &CliArgs) -> Result<BrushAtlas, String> {
    let compact = load_brush(&args.compact_brush, args.force)?;
    let elongated = load_brush(&args.elongated_brush, args.force)?;
    let fingerprint = BrushAtlas::fingerprint(&compact, &elongated, args.scale);

    if let Some(cache) = &args.atlas_cache
        && cache.exists()
    {
        match load_atlas_cache(cache, fingerprint) {
            Ok(Some(atlas)) => {
                log_info!("brush atlas loaded from {}", cache.display());
                return Ok(atlas);
            }
            Ok(None) => log_info!("brush atlas cache {} is stale, rebuilding", cache.display()),
            Err(e) => log_warn!("ignoring brush atlas cache {}: {}", cache.display(), e),
        }
    }

    let atlas = BrushAtlas::build(&compact, &elongated, args.scale);
    log_info!("brush atlas built (scale {})", args.scale);

    if let Some(cache) = &args.atlas_cache
        && let Err(e) = save_atlas_cache(&atlas, cache)
    {
        eprintln!("warning: could not write atlas cache '{}': {}", cache.display(), e);
        log_warn!("could not write atlas cache {}: {}", cache.display(), e);
    }
    Ok(atlas)
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Paint one input.  Returns the written files in order.
fn run_one(
    input: &Path,
    args: &CliArgs,
    atlas: &BrushAtlas,
    settings: &PaintSettings,
) -> Result<Vec<PathBuf>, String> {
    // -- Step 1: Load + validate -----------------------------------------
    let source = load_source_image(input)?;
    let (w, h) = (source.width(), source.height());
    if w == 0 || h == 0 {
        return Err("input image has a size of 0".to_string());
    }
    if w.max(h) > MAX_INPUT_SIDE {
        let msg = format!(
            "input is {}x{}, maximum is {}x{}",
            w, h, MAX_INPUT_SIDE, MAX_INPUT_SIDE
        );
        if !args.force {
            return Err(format!("{} (use --force to proceed)", msg));
        }
        eprintln!("  warning: {}", msg);
        log_warn!("{}", msg);
    }
    if source.is_black() {
        return Err("input image is purely black".to_string());
    }
    log_info!("{}: {}x{}", input.display(), w, h);

    let mut written = Vec::new();
    let mut save = |img: &image::RgbImage, suffix: &str| -> Result<(), String> {
        let path = output_path(input, args.output_dir.as_deref(), suffix)
            .ok_or_else(|| format!("cannot determine output path for '{}'", input.display()))?;
        save_png(img, &path)?;
        written.push(path);
        Ok(())
    };

    // -- Step 2: Features + noisy source ---------------------------------
    let t = Instant::now();
    let features = FeatureMaps::extract(&source);
    if args.verbose {
        println!("  features ({:.0}ms)", t.elapsed().as_secs_f64() * 1000.0);
    }

    let noisy = args
        .noise
        .and_then(|sigma| add_gaussian_noise(&source, sigma, settings.seed));
    if let Some(noisy) = &noisy {
        save(&noisy.to_rgb_image(), "noisy")?;
    }

    // -- Step 3: Paint ---------------------------------------------------
    let t = Instant::now();
    let mut canvas = Canvas::new(&source, noisy.as_ref(), &features, atlas, settings.clone())?;
    let report = canvas.paint_all();
    if args.verbose {
        print_report(&report, canvas.workers(), t.elapsed().as_secs_f64());
    }

    let raw = canvas.finalize();
    save(&raw, "raw")?;
    if args.blur > 0 {
        save(&gaussian_blur_rgb(&raw, args.blur), "raw-blur")?;
    }

    // -- Step 4: Fill gaps -----------------------------------------------
    let fill = canvas.fill_unpainted();
    if args.verbose {
        println!("  fill: {} regions, {} pixels", fill.regions, fill.pixels);
    }
    let result = canvas.finalize();
    save(&result, "result")?;
    if args.blur > 0 {
        save(&gaussian_blur_rgb(&result, args.blur), "result-blur")?;
    }

    Ok(written)
}

fn print_report(report: &PaintReport, workers: usize, secs: f64) {
    for phase in &report.phases {
        println!("  {}", phase);
    }
    println!(
        "  painted on {} thread(s) in {:.0}ms: {} committed, {} rejected, {} dropped, {} stale retries",
        workers,
        secs * 1000.0,
        report.committed(),
        report.rejected(),
        report.dropped(),
        report.stale_retries()
    );
}

// ============================================================================
// Helpers
// ============================================================================

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
pub fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `<dir>/<stem>-<suffix>.png`, with `dir` defaulting to the input's directory.
pub fn output_path(input: &Path, output_dir: Option<&Path>, suffix: &str) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let dir = match output_dir {
        Some(dir) => dir,
        None => input.parent().unwrap_or(Path::new(".")),
    };
    Some(dir.join(format!("{}-{}.png", stem, suffix)))
}
