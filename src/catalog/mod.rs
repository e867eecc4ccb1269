//! The relational catalog store.
//!
//! Schema creation is an external collaborator (spec §1 names it out of
//! scope); this module only ever reads and writes rows in
//! `encryption_keys`, `processing_queue`, and `media_files`, assumed to
//! already exist.

pub mod models;

use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::DbConfig;
use crate::error::CatalogError;
use models::{EncryptionKey, FileType, JobStatus, MediaAsset, PendingJob, PoolStats};

const MIN_CONNECTIONS: u32 = 1;
const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_ATTEMPTS: u32 = 3;
const RETRY_COOLDOWN_MINUTES: i64 = 5;

/// Owns the connection pool and exposes the operations the queue worker,
/// reconciler, and transformers use. Cheap to clone (wraps an `Arc`
/// internally via `sqlx::PgPool`), so one instance is shared across tasks.
pub struct Catalog {
    pool: RwLock<PgPool>,
    db: DbConfig,
}

impl Catalog {
    /// Opens a pool (min 1, max 10 connections) against the given database.
    pub async fn connect(db: DbConfig) -> Result<Self, CatalogError> {
        let pool = build_pool(&db).await?;
        Ok(Self {
            pool: RwLock::new(pool),
            db,
        })
    }

    /// Acquires a connection, probing it with `SELECT 1`. On repeated
    /// failure across `ACQUIRE_ATTEMPTS` linearly-growing delays, tears
    /// down and recreates the whole pool once before giving up.
    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, CatalogError> {
        for attempt in 0..ACQUIRE_ATTEMPTS {
            let probe = {
                let pool = self.pool.read().await;
                match pool.acquire().await {
                    Ok(mut conn) => sqlx::query("SELECT 1").execute(&mut *conn).await.map(|_| conn),
                    Err(e) => Err(e),
                }
            };

            match probe {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "database connection attempt failed");
                    if attempt + 1 < ACQUIRE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2 * (attempt as u64 + 1))).await;
                    }
                }
            }
        }

        error!("all database connection attempts failed, recreating pool");
        let mut pool = self.pool.write().await;
        pool.close().await;
        *pool = build_pool(&self.db).await?;
        pool.acquire()
            .await
            .map_err(|e| CatalogError::ConnectionFailed(e.to_string()))
    }

    /// Returns the currently active encryption key, creating one if none
    /// exists. Racy across processes: on insert failure, re-selects once;
    /// if still absent, fails the caller (per spec §4.4).
    pub async fn get_or_create_active_key(&self) -> Result<EncryptionKey, CatalogError> {
        if let Some(key) = self.fetch_active_key().await? {
            return Ok(key);
        }

        let mut conn = self.acquire().await?;
        let mut key_bytes = [0u8; 16];
        let mut iv_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        rand::thread_rng().fill_bytes(&mut iv_bytes);
        let key_hex = hex::encode(key_bytes);
        let iv_hex = hex::encode(iv_bytes);

        let inserted = sqlx::query_as::<_, EncryptionKey>(
            "INSERT INTO encryption_keys (key_value, iv_value, is_active)
             VALUES ($1, $2, true)
             RETURNING id, key_value, iv_value, is_active",
        )
        .bind(&key_hex)
        .bind(&iv_hex)
        .fetch_one(&mut *conn)
        .await;

        match inserted {
            Ok(key) => {
                info!(key_id = %key.id, "created new encryption key");
                // Re-read to confirm durability, per spec §4.4.
                match self.fetch_active_key().await? {
                    Some(verified) => Ok(verified),
                    None => Err(CatalogError::NoActiveKey),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to create encryption key, retrying select");
                self.fetch_active_key()
                    .await?
                    .ok_or(CatalogError::NoActiveKey)
            }
        }
    }

    async fn fetch_active_key(&self) -> Result<Option<EncryptionKey>, CatalogError> {
        let mut conn = self.acquire().await?;
        let key = sqlx::query_as::<_, EncryptionKey>(
            "SELECT id, key_value, iv_value, is_active
             FROM encryption_keys WHERE is_active = true LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;
        Ok(key)
    }

    /// Looks up an existing asset by content hash (the dedup gate, §4.3).
    pub async fn check_duplicate_by_hash(
        &self,
        file_hash: &str,
    ) -> Result<Option<MediaAsset>, CatalogError> {
        let mut conn = self.acquire().await?;
        let asset = sqlx::query_as::<_, MediaAsset>(
            "SELECT id, original_name, file_hash, file_type, mime_type, file_size_bytes,
                    width, height, duration_seconds, storage_path, thumbnail_path,
                    preview_path, encryption_key_id, metadata
             FROM media_files WHERE file_hash = $1 LIMIT 1",
        )
        .bind(file_hash)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(asset)
    }

    /// Idempotently enqueues a file (no-op if `file_path` already has a row).
    pub async fn add_to_queue(
        &self,
        file_path: &str,
        file_type: FileType,
    ) -> Result<(), CatalogError> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            "INSERT INTO processing_queue (file_path, file_type, status)
             VALUES ($1, $2, 'queued')
             ON CONFLICT (file_path) DO NOTHING",
        )
        .bind(file_path)
        .bind(file_type)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Atomically updates status, setting `started_at`/`completed_at`
    /// according to the new status (per spec §3's invariant).
    pub async fn update_queue_status(
        &self,
        file_path: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), CatalogError> {
        let mut conn = self.acquire().await?;
        let is_processing = matches!(status, JobStatus::Processing);
        let is_terminal = matches!(status, JobStatus::Completed | JobStatus::Failed);
        sqlx::query(
            "UPDATE processing_queue
             SET status = $1, error_message = $2,
                 started_at = CASE WHEN $3 THEN NOW() ELSE started_at END,
                 completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END
             WHERE file_path = $5",
        )
        .bind(status)
        .bind(error_message)
        .bind(is_processing)
        .bind(is_terminal)
        .bind(file_path)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Up to `limit` queued jobs eligible to run, oldest-first within priority.
    pub async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<PendingJob>, CatalogError> {
        let mut conn = self.acquire().await?;
        let jobs = sqlx::query_as::<_, PendingJob>(
            "SELECT id, file_path, file_type, retry_count, max_retries
             FROM processing_queue
             WHERE status = 'queued' AND retry_count < max_retries
             ORDER BY priority DESC, queued_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(jobs)
    }

    /// Up to `limit` failed jobs whose retry cooldown has elapsed.
    pub async fn get_failed_jobs_for_retry(
        &self,
        limit: i64,
    ) -> Result<Vec<PendingJob>, CatalogError> {
        let mut conn = self.acquire().await?;
        let jobs = sqlx::query_as::<_, PendingJob>(
            "SELECT id, file_path, file_type, retry_count, max_retries
             FROM processing_queue
             WHERE status = 'failed' AND retry_count < max_retries
               AND (completed_at IS NULL OR completed_at < NOW() - INTERVAL '5 minutes')
             ORDER BY priority DESC, queued_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(jobs)
    }

    /// Resets a job to `queued`, bumping `retry_count` and clearing the
    /// timestamps/error so the next polling round picks it up fresh.
    pub async fn increment_retry_count(&self, job_id: &str) -> Result<(), CatalogError> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            "UPDATE processing_queue
             SET retry_count = retry_count + 1, status = 'queued',
                 error_message = NULL, started_at = NULL, completed_at = NULL
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Marks a job `processing`, setting `started_at`.
    pub async fn mark_processing(&self, job_id: &str) -> Result<(), CatalogError> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            "UPDATE processing_queue SET status = 'processing', started_at = NOW()
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Resets any row still `processing` older than the retry cooldown back
    /// to `queued`. Run once at startup before the worker pool dispatches
    /// (DESIGN.md's resolution of the §9 stranded-row open question).
    pub async fn reap_stranded_processing_rows(&self) -> Result<u64, CatalogError> {
        let mut conn = self.acquire().await?;
        let result = sqlx::query(
            "UPDATE processing_queue
             SET status = 'queued', started_at = NULL
             WHERE status = 'processing'
               AND started_at < NOW() - INTERVAL '5 minutes'",
        )
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Inserts a new asset row. Per spec §5, callers must only invoke this
    /// after every artifact named by `asset.storage_path` (and the optional
    /// thumbnail/preview paths) exists on disk.
    pub async fn save_media_metadata(&self, asset: &MediaAsset) -> Result<(), CatalogError> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            "INSERT INTO media_files (
                id, original_name, file_hash, file_type, mime_type, file_size_bytes,
                width, height, duration_seconds, storage_path,
                thumbnail_path, preview_path, encryption_key_id,
                processing_status, processing_completed_at, metadata
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                'completed', NOW(), $14
            )",
        )
        .bind(&asset.id)
        .bind(&asset.original_name)
        .bind(&asset.file_hash)
        .bind(asset.file_type)
        .bind(&asset.mime_type)
        .bind(asset.file_size_bytes)
        .bind(asset.width)
        .bind(asset.height)
        .bind(asset.duration_seconds)
        .bind(&asset.storage_path)
        .bind(&asset.thumbnail_path)
        .bind(&asset.preview_path)
        .bind(&asset.encryption_key_id)
        .bind(&asset.metadata)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Runs `SELECT 1` against the pool and reports whether it succeeded,
    /// for the database health monitor (grounded on the original's
    /// `check_connection_health`).
    pub async fn check_health(&self) -> bool {
        self.acquire().await.is_ok()
    }

    /// Connection pool diagnostics, surfaced by the health monitor.
    pub async fn pool_stats(&self) -> PoolStats {
        let pool = self.pool.read().await;
        PoolStats {
            connected: !pool.is_closed(),
            min_connections: MIN_CONNECTIONS,
            max_connections: MAX_CONNECTIONS,
            size: pool.size(),
            idle: pool.num_idle(),
        }
    }
}

async fn build_pool(db: &DbConfig) -> Result<PgPool, CatalogError> {
    PgPoolOptions::new()
        .min_connections(MIN_CONNECTIONS)
        .max_connections(MAX_CONNECTIONS)
        .connect(&db.connection_string())
        .await
        .map_err(|e| CatalogError::ConnectionFailed(e.to_string()))
}

/// Generates the opaque 16-hex-character id used for `MediaAsset` and
/// queue-adjacent job identifiers, matching the original's
/// `sha256(path + timestamp)[:16]` derivation so downstream storage paths
/// (`images/{id}.webp.enc`) keep their existing shape.
pub fn generate_file_id(file_path: &str) -> String {
    use sha2::{Digest, Sha256};
    let micros = Utc::now().timestamp_micros();
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(micros.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Derives the MIME type from a file extension, falling back to a generic
/// octet stream for anything not in the recognized table.
pub fn mime_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "dng" => "image/dng",
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_sixteen_hex_chars() {
        let id = generate_file_id("/intake/a.jpg");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn mime_type_known_extensions() {
        assert_eq!(mime_type_for_extension("JPG"), "image/jpeg");
        assert_eq!(mime_type_for_extension("webm"), "video/webm");
        assert_eq!(mime_type_for_extension("bmp"), "application/octet-stream");
    }
}

/// The SQL in [`Catalog`] targets Postgres directly (`$N` placeholders,
/// `NOW()`/`INTERVAL`), so these tests exercise the ordering and retry
/// predicates from spec §4.2 against an in-memory SQLite pool with
/// SQLite-flavored equivalents of the same queries — keeping the catalog's
/// core selection logic portable and testable without a live Postgres
/// instance (SPEC_FULL.md §A.4).
#[cfg(test)]
mod sqlite_portability_tests {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn pool_with_schema() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE processing_queue (
                id TEXT PRIMARY KEY,
                file_path TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                priority INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT NOT NULL,
                completed_at TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn pending_jobs_order_by_priority_then_queued_at() {
        let pool = pool_with_schema().await;

        for (id, priority, queued_at) in [
            ("a", 0, "2024-01-01T00:00:00"),
            ("b", 5, "2024-01-01T00:00:05"),
            ("c", 5, "2024-01-01T00:00:01"),
        ] {
            sqlx::query(
                "INSERT INTO processing_queue (id, file_path, status, priority, queued_at)
                 VALUES (?, ?, 'queued', ?, ?)",
            )
            .bind(id)
            .bind(format!("/intake/{id}.jpg"))
            .bind(priority)
            .bind(queued_at)
            .execute(&pool)
            .await
            .unwrap();
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM processing_queue
             WHERE status = 'queued' AND retry_count < max_retries
             ORDER BY priority DESC, queued_at ASC",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let order: Vec<&str> = rows.iter().map(|(id,)| id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn exhausted_retries_are_excluded() {
        let pool = pool_with_schema().await;

        sqlx::query(
            "INSERT INTO processing_queue
                (id, file_path, status, retry_count, max_retries, queued_at)
             VALUES ('x', '/intake/x.jpg', 'failed', 3, 3, '2024-01-01T00:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM processing_queue
             WHERE status = 'failed' AND retry_count < max_retries",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert!(rows.is_empty());
    }
}
