//! Media transformers (spec §4.5, §4.6): turn a plaintext intake file into
//! the encrypted artifacts recorded against a `MediaAsset` row.

pub mod image;
pub mod video;

use std::path::PathBuf;

/// The artifacts and metadata a transformer produces for one job.
///
/// `paths_to_encrypt` names plaintext files the caller must run through
/// [`crate::crypto::encrypt_file`] before the catalog row can be written;
/// `finalized_paths` names artifacts already in their final on-disk form
/// (e.g. an HLS manifest and its segments, which carry their own
/// per-segment encryption driven by the key-info descriptor rather than
/// the file encryptor). Both must exist on disk before `storage_path` is
/// recorded (spec §5).
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub preview_path: Option<String>,
    pub extra_metadata: serde_json::Value,
    pub paths_to_encrypt: Vec<PathBuf>,
    pub finalized_paths: Vec<PathBuf>,
}
