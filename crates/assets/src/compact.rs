/// Lossy compaction of image assets for size-constrained storage
use crate::{AssetError, ImageAsset};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

/// Bounding box and encoder quality applied on every persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Maximum length of the longer edge, in pixels
    pub max_dimension: u32,

    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            quality: 70,
        }
    }
}

/// Downsample `asset` to fit `settings.max_dimension` and re-encode it as JPEG.
///
/// Images already inside the bounding box keep their dimensions but are still
/// re-encoded. The result is always `image/jpeg`.
pub fn compact(
    asset: &ImageAsset,
    settings: &CompactionSettings,
) -> Result<ImageAsset, AssetError> {
    let bytes = asset.decode_bytes()?;
    let img = image::load_from_memory(&bytes)?;
    let (width, height) = img.dimensions();
    let (target_w, target_h) = fit_within(width, height, settings.max_dimension);

    let resized = if (target_w, target_h) == (width, height) {
        img
    } else {
        img.resize_exact(target_w, target_h, FilterType::Lanczos3)
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(
        &mut out,
        settings.quality.clamp(1, 100),
    ))?;

    tracing::debug!(
        from = %format!("{width}x{height}"),
        to = %format!("{target_w}x{target_h}"),
        before_bytes = bytes.len(),
        after_bytes = out.len(),
        "compacted image"
    );

    Ok(ImageAsset::from_bytes(&out, "image/jpeg"))
}

/// Scale `(width, height)` so the longer edge is at most `max`, keeping aspect.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if max == 0 || (width <= max && height <= max) {
        return (width, height);
    }
    if width >= height {
        let scaled = (height as f64 * max as f64 / width as f64).round() as u32;
        (max, scaled.max(1))
    } else {
        let scaled = (width as f64 * max as f64 / height as f64).round() as u32;
        (scaled.max(1), max)
    }
}
