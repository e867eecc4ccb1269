//! Video transformer (spec §4.6): probe → write a per-job key-info
//! descriptor → concurrently encode a segmented encrypted HLS stream and
//! generate an animated thumbnail/preview with cascading fallbacks →
//! record the per-video IV in `extra_metadata`.

use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::info;

use crate::error::TransformError;
use crate::tools::{ffmpeg, ffprobe};

use super::TransformOutput;

/// Runs the video pipeline for one job. `video_id` namespaces the output
/// directory under `videos_dir`; `key_info_path` is this job's private
/// descriptor path and `raw_key_path` the shared raw key file the
/// descriptor points the encoder at (spec §4.4, §6).
pub async fn process_video(
    input_path: &Path,
    video_id: &str,
    videos_dir: &Path,
    key_info_path: &Path,
    raw_key_path: &Path,
    public_base_url: &str,
) -> Result<TransformOutput, TransformError> {
    let output_dir = videos_dir.join(video_id);
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| TransformError::HlsEncodeFailed(e.to_string()))?;

    let video_info = ffprobe::probe(input_path).await?;

    let mut iv_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv_bytes);
    let iv_hex = hex::encode(iv_bytes);

    write_key_info(key_info_path, public_base_url, video_id, raw_key_path, &iv_hex)
        .map_err(|e| TransformError::HlsEncodeFailed(e.to_string()))?;

    // The thumbnail task and the HLS encode run concurrently (spec §4.6,
    // §5); the job completes only once both finish.
    let thumb_input = input_path.to_path_buf();
    let thumb_output_dir = output_dir.clone();
    let duration = video_info.duration_seconds;
    let thumbnail_task = tokio::spawn(async move {
        ffmpeg::generate_thumbnails(&thumb_input, &thumb_output_dir, duration).await
    });

    let encode_result = ffmpeg::encode_hls(input_path, &output_dir, key_info_path).await;

    let thumbnail_result = thumbnail_task.await;

    // Clean up the key-info descriptor regardless of outcome — it must not
    // outlive this job (spec §4.6 step 6).
    let _ = std::fs::remove_file(key_info_path);

    encode_result.map_err(|e| TransformError::HlsEncodeFailed(e.to_string()))?;
    let (thumbnail_path, preview_path) = thumbnail_result
        .map_err(|e| TransformError::ThumbnailFailed(e.to_string()))?
        .map_err(|e| TransformError::ThumbnailFailed(e.to_string()))?;

    let mut finalized_paths = vec![output_dir.join("stream.m3u8")];
    finalized_paths.extend(segment_paths(&output_dir)?);

    info!(
        video_id,
        width = video_info.width,
        height = video_info.height,
        duration = video_info.duration_seconds,
        "video transform complete"
    );

    Ok(TransformOutput {
        width: Some(video_info.width as i32),
        height: Some(video_info.height as i32),
        duration_seconds: Some(video_info.duration_seconds),
        storage_path: format!("videos/{video_id}/stream.m3u8"),
        thumbnail_path: Some(format!("videos/{video_id}/thumbnail.webp.enc")),
        preview_path: Some(format!("videos/{video_id}/preview.webp.enc")),
        extra_metadata: serde_json::json!({ "iv": iv_hex }),
        paths_to_encrypt: vec![thumbnail_path, preview_path],
        finalized_paths,
    })
}

/// Writes the three-line key-info descriptor the streaming encoder reads
/// (spec §6): key-delivery URL, local raw-key path, per-video IV.
fn write_key_info(
    path: &Path,
    base_url: &str,
    video_id: &str,
    raw_key_path: &Path,
    iv_hex: &str,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = format!(
        "{base_url}/api/media/keys/{video_id}\n{}\n{iv_hex}\n",
        raw_key_path.display()
    );
    std::fs::write(path, contents)
}

fn segment_paths(output_dir: &Path) -> Result<Vec<PathBuf>, TransformError> {
    let mut segments = Vec::new();
    let entries = std::fs::read_dir(output_dir)
        .map_err(|e| TransformError::HlsEncodeFailed(e.to_string()))?;

    for entry in entries {
        let entry = entry.map_err(|e| TransformError::HlsEncodeFailed(e.to_string()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("segment") && name.ends_with(".ts") {
            segments.push(entry.path());
        }
    }
    segments.sort();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_info_has_exactly_three_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key_info_abc.txt");
        let raw_key_path = dir.path().join("private/encryption.key");

        write_key_info(
            &path,
            "https://localhost:1027",
            "abc123",
            &raw_key_path,
            "00112233445566778899aabbccddeeff",
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "https://localhost:1027/api/media/keys/abc123");
        assert_eq!(lines[1], raw_key_path.to_string_lossy());
        assert_eq!(lines[2], "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn segment_paths_only_match_segment_ts_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("segment000.ts"), b"").unwrap();
        std::fs::write(dir.path().join("segment001.ts"), b"").unwrap();
        std::fs::write(dir.path().join("stream.m3u8"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let segments = segment_paths(dir.path()).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|p| p.extension().unwrap() == "ts"));
    }
}
