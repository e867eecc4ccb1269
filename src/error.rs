//! Error types for the media ingestion core.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable '{0}'")]
    MissingVar(String),

    #[error("Invalid value for environment variable '{name}': {message}")]
    InvalidVar { name: String, message: String },
}

/// Catalog (SQL) operation errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to connect to catalog database: {0}")]
    ConnectionFailed(String),

    #[error("Catalog query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("No active encryption key could be created or found")]
    NoActiveKey,

    #[error("Media asset '{id}' references unknown encryption key '{key_id}'")]
    DanglingKeyReference { id: String, key_id: String },
}

/// Queue state machine errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job '{job_id}' not found")]
    JobNotFound { job_id: String },

    #[error("Source file for job '{job_id}' no longer exists: {path}")]
    SourceMissing { job_id: String, path: PathBuf },

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),
}

/// Media transformation errors.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    ImageDecodeFailed(String),

    #[error("Failed to encode image: {0}")]
    ImageEncodeFailed(String),

    #[error("Video has no video stream")]
    NoVideoStream,

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("HLS encode failed: {0}")]
    HlsEncodeFailed(String),

    #[error("Thumbnail generation failed: {0}")]
    ThumbnailFailed(String),
}

/// Encryption/crypto errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to read plaintext '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write encrypted artifact '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Key management failure: {0}")]
    KeyManagement(String),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to watch directory '{path}': {message}")]
    WatchFailed { path: PathBuf, message: String },

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// External tool driver errors.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("'{tool}' failed with exit code {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to spawn '{tool}': {source}")]
    SpawnFailed {
        tool: String,
        source: std::io::Error,
    },

    #[error("Failed to parse '{tool}' output: {message}")]
    ParseFailed { tool: String, message: String },
}
