//! Image transformer (spec §4.5): decode → optionally flatten alpha →
//! optionally downscale → re-encode → derive thumbnail.
//!
//! Decoding itself uses the `image` crate for everything it natively
//! supports; HEIC/HEIF/DNG inputs are delegated to `ffmpeg` first (spec §1
//! excludes in-process decoding of exotic raw formats from this core, not
//! the feature itself), producing an intermediate PNG the `image` crate
//! can then read. Lossy WebP encoding at an explicit quality needs the
//! `webp` crate — the `image` crate's built-in WebP encoder is
//! lossless-only.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::info;

use crate::error::TransformError;
use crate::tools;

use super::TransformOutput;

const MAX_WIDTH: u32 = 3840;
const MAX_HEIGHT: u32 = 2160;
const MAIN_QUALITY: f32 = 85.0;
const THUMBNAIL_WIDTH: u32 = 320;
const THUMBNAIL_QUALITY: f32 = 75.0;

const DELEGATED_EXTENSIONS: [&str; 3] = ["heic", "heif", "dng"];

/// Runs the full image pipeline for one job. Writes `{image_id}.webp` and
/// `{image_id}_thumb.webp` under `images_dir`; the returned
/// `paths_to_encrypt` point at those plaintext files for the caller to
/// encrypt (spec §4.7).
pub async fn process_image(
    input_path: &Path,
    image_id: &str,
    images_dir: &Path,
) -> Result<TransformOutput, TransformError> {
    std::fs::create_dir_all(images_dir)
        .map_err(|e| TransformError::ImageEncodeFailed(e.to_string()))?;

    let source = ensure_decodable(input_path).await?;

    let decoded = image::open(source.path())
        .map_err(|e| TransformError::ImageDecodeFailed(e.to_string()))?;

    if let Source::Converted(path) = &source {
        let _ = std::fs::remove_file(path);
    }

    let composited = composite_over_white(decoded);
    let (original_width, original_height) = composited.dimensions();

    let main_image = if original_width > MAX_WIDTH || original_height > MAX_HEIGHT {
        composited.resize(MAX_WIDTH, MAX_HEIGHT, FilterType::Lanczos3)
    } else {
        composited.clone()
    };
    let (width, height) = main_image.dimensions();

    let output_path = images_dir.join(format!("{image_id}.webp"));
    encode_webp(&main_image, &output_path, MAIN_QUALITY)?;

    let thumbnail_height =
        ((THUMBNAIL_WIDTH as f64) * (original_height as f64) / (original_width as f64))
            .round()
            .max(1.0) as u32;
    let thumbnail_image =
        composited.resize_exact(THUMBNAIL_WIDTH, thumbnail_height, FilterType::Lanczos3);
    let thumbnail_path = images_dir.join(format!("{image_id}_thumb.webp"));
    encode_webp(&thumbnail_image, &thumbnail_path, THUMBNAIL_QUALITY)?;

    info!(image_id, width, height, "image transform complete");

    Ok(TransformOutput {
        width: Some(width as i32),
        height: Some(height as i32),
        duration_seconds: None,
        storage_path: format!("images/{image_id}.webp.enc"),
        thumbnail_path: Some(format!("images/{image_id}_thumb.webp.enc")),
        preview_path: None,
        extra_metadata: serde_json::json!({}),
        paths_to_encrypt: vec![output_path, thumbnail_path],
        finalized_paths: vec![],
    })
}

enum Source {
    Direct(PathBuf),
    Converted(PathBuf),
}

impl Source {
    fn path(&self) -> &Path {
        match self {
            Source::Direct(p) | Source::Converted(p) => p,
        }
    }
}

/// Converts HEIC/HEIF/DNG inputs to an intermediate PNG via `ffmpeg` so the
/// `image` crate can decode them; everything else passes through unchanged.
async fn ensure_decodable(input_path: &Path) -> Result<Source, TransformError> {
    let needs_conversion = input_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| DELEGATED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if !needs_conversion {
        return Ok(Source::Direct(input_path.to_path_buf()));
    }

    let converted = input_path.with_extension("decoded.png");
    let input_str = input_path.to_string_lossy().into_owned();
    let output_str = converted.to_string_lossy().into_owned();

    tools::run("ffmpeg", &["-y", "-i", &input_str, &output_str])
        .await
        .map_err(|e| {
            TransformError::ImageDecodeFailed(format!("delegated decode via ffmpeg failed: {e}"))
        })?;

    Ok(Source::Converted(converted))
}

/// Composites any alpha channel over opaque white, matching the original's
/// `Image.new('RGB', ...).paste(img, mask=alpha)` behavior; images without
/// alpha just convert straight to RGB.
fn composite_over_white(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = image::RgbImage::new(width, height);

    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let alpha = a as f32 / 255.0;
        let blend = |channel: u8| -> u8 {
            (channel as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8
        };
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }

    DynamicImage::ImageRgb8(out)
}

fn encode_webp(img: &DynamicImage, path: &Path, quality: f32) -> Result<(), TransformError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode(quality);
    std::fs::write(path, &*encoded).map_err(|e| TransformError::ImageEncodeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn write_test_png(path: &Path, width: u32, height: u32, alpha: u8) {
        let mut img = RgbaImage::new(width, height);
        for px in img.pixels_mut() {
            *px = Rgba([200, 100, 50, alpha]);
        }
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn preserves_dimensions_under_the_cap() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.png");
        write_test_png(&input, 800, 400, 255);

        let images_dir = dir.path().join("images");
        let output = process_image(&input, "abc123", &images_dir).await.unwrap();

        assert_eq!(output.width, Some(800));
        assert_eq!(output.height, Some(400));
        assert_eq!(output.paths_to_encrypt.len(), 2);
        assert_eq!(output.storage_path, "images/abc123.webp.enc");
    }

    #[tokio::test]
    async fn downscales_oversized_images_within_cap_preserving_aspect() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("big.png");
        write_test_png(&input, 4000, 3000, 255);

        let images_dir = dir.path().join("images");
        let output = process_image(&input, "big1", &images_dir).await.unwrap();

        let width = output.width.unwrap();
        let height = output.height.unwrap();
        assert!(width <= MAX_WIDTH as i32);
        assert!(height <= MAX_HEIGHT as i32);
        // 4000x3000 is 4:3; the downscaled result should keep that ratio
        // within a pixel of rounding.
        let expected_height = (width as f64 * 3000.0 / 4000.0).round() as i32;
        assert!((height - expected_height).abs() <= 1);
    }

    #[tokio::test]
    async fn transparent_input_composites_over_white() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("transparent.png");
        write_test_png(&input, 100, 60, 0);

        let images_dir = dir.path().join("images");
        let output = process_image(&input, "alpha1", &images_dir).await.unwrap();

        assert_eq!(output.width, Some(100));
        assert_eq!(output.height, Some(60));
    }
}
