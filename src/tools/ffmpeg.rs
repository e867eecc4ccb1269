//! HLS encoding and animated-thumbnail generation (spec §4.6).

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::ToolError;

const THUMBNAIL_WIDTH: u32 = 320;
const THUMBNAIL_FPS: u32 = 10;
const THUMBNAIL_DURATION_SECS: u32 = 3;
const THUMBNAIL_QUALITY: u32 = 75;
const PREVIEW_WIDTH: u32 = 480;
const PREVIEW_FPS: u32 = 5;
const PREVIEW_MAX_FRAMES: u32 = 20;
const PREVIEW_QUALITY: u32 = 80;
const COMPRESSION_LEVEL: u32 = 6;
const MIN_ARTIFACT_BYTES: u64 = 1000;

const SEGMENT_DURATION_SECS: u32 = 10;
const H264_PRESET: &str = "veryfast";
const H264_CRF: u32 = 23;
const AAC_BITRATE: &str = "128k";

/// Re-encodes `input` into an encrypted HLS presentation under
/// `output_dir`, scaling to fit 1280x720 with even dimensions and driving
/// segment encryption from `key_info_path`. Writes `stream.m3u8` and
/// `segment%03d.ts` files into `output_dir`.
pub async fn encode_hls(
    input: &Path,
    output_dir: &Path,
    key_info_path: &Path,
) -> Result<(), ToolError> {
    std::fs::create_dir_all(output_dir).map_err(|e| ToolError::SpawnFailed {
        tool: "ffmpeg".to_string(),
        source: e,
    })?;

    let input_str = input.to_string_lossy().into_owned();
    let segment_pattern = output_dir.join("segment%03d.ts").to_string_lossy().into_owned();
    let key_info_str = key_info_path.to_string_lossy().into_owned();
    let manifest = output_dir.join("stream.m3u8").to_string_lossy().into_owned();
    let hls_time = SEGMENT_DURATION_SECS.to_string();
    let crf = H264_CRF.to_string();

    // Longer edge fits a 1280x720 box, aspect preserved, dims forced even.
    let scale_filter = "scale=w=trunc(iw*min(1\\,min(1280/iw\\,720/ih))/2)*2:\
h=trunc(ih*min(1\\,min(1280/iw\\,720/ih))/2)*2";

    let args = [
        "-i",
        &input_str,
        "-vf",
        scale_filter,
        "-c:v",
        "libx264",
        "-preset",
        H264_PRESET,
        "-crf",
        &crf,
        "-c:a",
        "aac",
        "-b:a",
        AAC_BITRATE,
        "-hls_time",
        &hls_time,
        "-hls_list_size",
        "0",
        "-hls_segment_filename",
        &segment_pattern,
        "-hls_key_info_file",
        &key_info_str,
        "-hls_segment_type",
        "mpegts",
        "-hls_flags",
        "delete_segments+independent_segments",
        &manifest,
    ];

    super::run("ffmpeg", &args).await?;
    info!(output = %manifest, "HLS stream encoded");
    Ok(())
}

/// Thumbnail/preview generation protocol (spec §4.6's cascading fallback).
pub async fn generate_thumbnails(
    input: &Path,
    output_dir: &Path,
    duration_seconds: f64,
) -> Result<(PathBuf, PathBuf), ToolError> {
    std::fs::create_dir_all(output_dir).map_err(|e| ToolError::SpawnFailed {
        tool: "ffmpeg".to_string(),
        source: e,
    })?;

    let thumbnail_path = output_dir.join("thumbnail.webp");
    let preview_path = output_dir.join("preview.webp");
    let start = (duration_seconds * 0.10).max(5.0);

    let animated_success = try_animated_thumbnail(input, &thumbnail_path, start).await;
    if !animated_success {
        warn!("animated thumbnail unavailable, falling back to static");
        create_static_thumbnail(input, &thumbnail_path, start).await;
    }

    if animated_success {
        let preview_ok = try_animated_preview(input, &preview_path, start).await;
        if !preview_ok {
            if artifact_is_large_enough(&thumbnail_path) {
                let _ = std::fs::copy(&thumbnail_path, &preview_path);
            } else {
                create_static_thumbnail(input, &preview_path, start + 5.0).await;
            }
        }
    } else {
        create_static_thumbnail(input, &preview_path, start + 5.0).await;
    }

    for path in [&thumbnail_path, &preview_path] {
        if !artifact_is_large_enough(path) {
            error!(path = %path.display(), "artifact missing or too small, regenerating");
            create_static_thumbnail(input, path, start).await;
        }
    }

    Ok((thumbnail_path, preview_path))
}

async fn try_animated_thumbnail(input: &Path, output: &Path, start: f64) -> bool {
    let input_str = input.to_string_lossy().into_owned();
    let start_str = format!("{start}");
    let duration_str = THUMBNAIL_DURATION_SECS.to_string();
    let vf = format!("fps={THUMBNAIL_FPS},scale={THUMBNAIL_WIDTH}:-1:flags=lanczos");
    let compression_level = COMPRESSION_LEVEL.to_string();
    let quality = THUMBNAIL_QUALITY.to_string();
    let output_str = output.to_string_lossy().into_owned();

    let args = [
        "-i",
        &input_str,
        "-ss",
        &start_str,
        "-t",
        &duration_str,
        "-vf",
        &vf,
        "-c:v",
        "libwebp",
        "-lossless",
        "0",
        "-compression_level",
        &compression_level,
        "-quality",
        &quality,
        "-preset",
        "default",
        "-loop",
        "0",
        "-an",
        "-vsync",
        "0",
        &output_str,
    ];

    match super::run("ffmpeg", &args).await {
        Ok(_) if artifact_is_large_enough(output) => true,
        Ok(_) => false,
        Err(e) => {
            error!(error = %e, "animated thumbnail generation failed");
            false
        }
    }
}

async fn try_animated_preview(input: &Path, output: &Path, start: f64) -> bool {
    let input_str = input.to_string_lossy().into_owned();
    let start_str = format!("{start}");
    let vf = format!(
        "fps=1,scale={PREVIEW_WIDTH}:-1:flags=lanczos,select='not(mod(n\\,{PREVIEW_FPS}))'"
    );
    let max_frames = PREVIEW_MAX_FRAMES.to_string();
    let compression_level = COMPRESSION_LEVEL.to_string();
    let quality = PREVIEW_QUALITY.to_string();
    let output_str = output.to_string_lossy().into_owned();

    let args = [
        "-i",
        &input_str,
        "-ss",
        &start_str,
        "-t",
        "10",
        "-vf",
        &vf,
        "-frames:v",
        &max_frames,
        "-c:v",
        "libwebp",
        "-lossless",
        "0",
        "-compression_level",
        &compression_level,
        "-quality",
        &quality,
        "-preset",
        "default",
        "-loop",
        "0",
        "-an",
        "-vsync",
        "0",
        &output_str,
    ];

    match super::run("ffmpeg", &args).await {
        Ok(_) if artifact_is_large_enough(output) => true,
        Ok(_) => false,
        Err(e) => {
            error!(error = %e, "preview generation failed");
            false
        }
    }
}

/// Static single-frame fallback. Tries two `ffmpeg` invocations before
/// emitting a known-good embedded placeholder so the pipeline never stalls.
async fn create_static_thumbnail(input: &Path, output: &Path, start: f64) {
    let input_str = input.to_string_lossy().into_owned();
    let output_str = output.to_string_lossy().into_owned();
    let vf = format!("scale={THUMBNAIL_WIDTH}:-1:flags=lanczos");
    let compression_level = COMPRESSION_LEVEL.to_string();
    let quality = THUMBNAIL_QUALITY.to_string();

    let attempt_1 = [
        "-i",
        input_str.as_str(),
        "-ss",
        &format!("{start}"),
        "-vframes",
        "1",
        "-vf",
        &vf,
        "-c:v",
        "libwebp",
        "-lossless",
        "0",
        "-compression_level",
        &compression_level,
        "-quality",
        &quality,
        "-y",
        output_str.as_str(),
    ];

    if super::run("ffmpeg", &attempt_1).await.is_ok() && artifact_is_large_enough(output) {
        info!(path = %output.display(), "static thumbnail created");
        return;
    }

    let earlier_start = (start - 2.0).max(0.0);
    let attempt_2 = [
        "-i",
        input_str.as_str(),
        "-ss",
        &format!("{earlier_start}"),
        "-vframes",
        "1",
        "-vf",
        &vf,
        "-y",
        output_str.as_str(),
    ];

    if super::run("ffmpeg", &attempt_2).await.is_ok() && artifact_is_large_enough(output) {
        info!(path = %output.display(), "static thumbnail created on second attempt");
        return;
    }

    error!(path = %output.display(), "all thumbnail attempts failed, writing embedded placeholder");
    let _ = std::fs::write(output, crate::crypto::PLACEHOLDER_WEBP);
}

fn artifact_is_large_enough(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() >= MIN_ARTIFACT_BYTES)
        .unwrap_or(false)
}
