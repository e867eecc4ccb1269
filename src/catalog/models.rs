//! Catalog row types.

use serde::{Deserialize, Serialize};

/// A file's media kind, as recognized from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
}

impl FileType {
    /// Classifies a file extension (case-insensitive, without the leading dot)
    /// per the recognized extension whitelist. `None` for unrecognized suffixes.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "dng" => {
                Some(FileType::Image)
            }
            "mp4" | "avi" | "mov" | "mkv" | "wmv" | "flv" | "webm" => Some(FileType::Video),
            _ => None,
        }
    }
}

/// Queue job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// A thin projection of `processing_queue` used by worker polling rounds —
/// the full row carries fields the worker never needs to re-read mid-round.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingJob {
    pub id: String,
    pub file_path: String,
    pub file_type: FileType,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// An active or retired symmetric content-encryption key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EncryptionKey {
    pub id: String,
    /// Hex-encoded 16-byte AES-128 key.
    pub key_value: String,
    /// Hex-encoded 16-byte IV (long-lived, not the per-video streaming IV).
    pub iv_value: String,
    pub is_active: bool,
}

/// A row in `media_files`, the durable result of one successful ingest.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaAsset {
    pub id: String,
    pub original_name: String,
    pub file_hash: String,
    pub file_type: FileType,
    pub mime_type: String,
    pub file_size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub preview_path: Option<String>,
    pub encryption_key_id: String,
    pub metadata: serde_json::Value,
}

/// Diagnostic snapshot of the connection pool, surfaced by the health monitor.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub connected: bool,
    pub min_connections: u32,
    pub max_connections: u32,
    pub size: u32,
    pub idle: usize,
}
