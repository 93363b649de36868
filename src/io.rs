use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::brush::BrushAtlas;
use crate::brush::BrushMask;
use crate::grid::SourceImage;

// ============================================================================
// IMAGE LOAD / SAVE
// ============================================================================

/// Decode any raster format the `image` crate understands into an RGB source.
pub fn load_source_image(path: &Path) -> Result<SourceImage, String> {
    let img = image::open(path)
        .map_err(|e| format!("Failed to open image {}: {}", path.display(), e))?
        .to_rgb8();
    Ok(SourceImage::from_rgb_image(&img))
}

/// Load a brush shape: dark pixels (luma below the brush threshold) are
/// brush pixels.  Returns the mask and the image's larger side.
pub fn load_brush_mask(path: &Path) -> Result<(BrushMask, u32), String> {
    let gray = image::open(path)
        .map_err(|e| format!("Failed to open brush {}: {}", path.display(), e))?
        .to_luma8();
    let largest = gray.width().max(gray.height());
    Ok((BrushMask::from_gray(&gray), largest))
}

pub fn save_png(image: &RgbImage, path: &Path) -> Result<(), String> {
    let file =
        File::create(path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
    let writer = BufWriter::new(file);
    PngEncoder::new(writer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ColorType::Rgb8,
        )
        .map_err(|e| format!("Failed to encode {}: {}", path.display(), e))
}

// ============================================================================
// BRUSH ATLAS CACHE
// ============================================================================

const ATLAS_MAGIC: &str = "RLXA1";

#[derive(Serialize, Deserialize)]
struct AtlasCacheFile {
    magic: String,
    fingerprint: u64,
    atlas: BrushAtlas,
}

/// Error type for atlas cache files
#[derive(Debug)]
pub enum AtlasCacheError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for AtlasCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtlasCacheError::Io(e) => write!(f, "I/O error: {}", e),
            AtlasCacheError::Serialize(e) => write!(f, "Serialization error: {}", e),
            AtlasCacheError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for AtlasCacheError {}

impl From<std::io::Error> for AtlasCacheError {
    fn from(e: std::io::Error) -> Self {
        AtlasCacheError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for AtlasCacheError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        AtlasCacheError::Serialize(e.to_string())
    }
}

pub fn save_atlas_cache(atlas: &BrushAtlas, path: &Path) -> Result<(), AtlasCacheError> {
    let file = AtlasCacheFile {
        magic: ATLAS_MAGIC.to_string(),
        fingerprint: atlas.fingerprint_value(),
        atlas: atlas.clone(),
    };
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &file)?;
    Ok(())
}

/// Read a cached atlas.  `Ok(None)` when the file was built from different
/// brushes or scale than `fingerprint` describes.
pub fn load_atlas_cache(
    path: &Path,
    fingerprint: u64,
) -> Result<Option<BrushAtlas>, AtlasCacheError> {
    let raw = std::fs::read(path)?;
    // bincode writes a String as an 8-byte length prefix + UTF-8 bytes.
    let end = 8 + ATLAS_MAGIC.len();
    if raw.len() < end {
        return Err(AtlasCacheError::InvalidFormat("File too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..end]).unwrap_or("");
    if magic != ATLAS_MAGIC {
        return Err(AtlasCacheError::InvalidFormat(format!(
            "Unknown magic '{}'",
            magic
        )));
    }

    let file: AtlasCacheFile = bincode::deserialize(&raw)?;
    if file.fingerprint != fingerprint || file.atlas.fingerprint_value() != fingerprint {
        return Ok(None);
    }
    Ok(Some(file.atlas))
}
