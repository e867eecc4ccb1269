//! Queue worker (spec §4.2): polls `processing_queue` for eligible rows and
//! drives each through dedup check, transform, and encryption.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::catalog::models::{FileType, JobStatus, MediaAsset, PendingJob};
use crate::catalog::{self, Catalog};
use crate::config::AppConfig;
use crate::crypto::{self, keystore};
use crate::error::CatalogError;
use crate::hash;
use crate::transform::{image, video};

const PENDING_BATCH: i64 = 5;
const RETRY_BATCH: i64 = 3;
const ROUND_SLEEP_SECS: u64 = 5;
const BASE_ERROR_BACKOFF_SECS: u64 = 10;
const ERROR_FLOOR_THRESHOLD: u32 = 5;
const ERROR_FLOOR_SECS: u64 = 60;

/// A single polling worker. Several may run concurrently against the same
/// catalog (spec §5); correctness of any one job does not depend on how
/// many workers are running.
pub struct QueueWorker {
    catalog: Arc<Catalog>,
    config: Arc<AppConfig>,
}

/// A catalog failure aborts the round without marking the job failed (spec
/// §4.2); any other error is caught and recorded against the job.
enum RunJobError {
    Database(CatalogError),
    Failed(String),
}

impl From<CatalogError> for RunJobError {
    fn from(e: CatalogError) -> Self {
        RunJobError::Database(e)
    }
}

/// What a job run produced, for the caller to record against the queue row.
enum JobOutcome {
    /// Transformed and cataloged normally.
    Processed,
    /// Hash already present; carries the note referencing the prior asset id
    /// (spec §4.3, §7: "duplicates carry a note referencing the pre-existing
    /// asset id").
    Duplicate(String),
}

impl QueueWorker {
    pub fn new(catalog: Arc<Catalog>, config: Arc<AppConfig>) -> Self {
        Self { catalog, config }
    }

    /// Runs polling rounds until `shutdown` is signalled true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.run_round().await {
                Ok(_) => {
                    consecutive_errors = 0;
                    Duration::from_secs(ROUND_SLEEP_SECS)
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "queue round aborted by database error");
                    let mut delay =
                        Duration::from_secs(BASE_ERROR_BACKOFF_SECS * consecutive_errors as u64);
                    if consecutive_errors >= ERROR_FLOOR_THRESHOLD {
                        delay = delay.max(Duration::from_secs(ERROR_FLOOR_SECS));
                    }
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("queue worker shut down");
    }

    /// Fetches one batch of eligible jobs and processes each in turn.
    /// Returns the number of jobs picked up, or the `CatalogError` that
    /// broke the round.
    async fn run_round(&self) -> Result<usize, CatalogError> {
        let mut jobs = self.catalog.get_pending_jobs(PENDING_BATCH).await?;
        jobs.extend(self.catalog.get_failed_jobs_for_retry(RETRY_BATCH).await?);

        let count = jobs.len();
        for job in &jobs {
            self.process_pending_job(job).await?;
        }
        Ok(count)
    }

    async fn process_pending_job(&self, job: &PendingJob) -> Result<(), CatalogError> {
        let input_path = PathBuf::from(&job.file_path);

        if !input_path.exists() {
            warn!(job_id = %job.id, path = %job.file_path, "source file missing, marking failed");
            self.catalog
                .update_queue_status(&job.file_path, JobStatus::Failed, Some("File not found"))
                .await?;
            return Ok(());
        }

        self.catalog.mark_processing(&job.id).await?;

        match self.run_job(job, &input_path).await {
            Ok(JobOutcome::Processed) => {
                self.catalog
                    .update_queue_status(&job.file_path, JobStatus::Completed, None)
                    .await?;
                info!(job_id = %job.id, "job completed");
            }
            Ok(JobOutcome::Duplicate(note)) => {
                self.catalog
                    .update_queue_status(&job.file_path, JobStatus::Completed, Some(&note))
                    .await?;
                info!(job_id = %job.id, note, "job completed as duplicate");
            }
            Err(RunJobError::Database(e)) => return Err(e),
            Err(RunJobError::Failed(message)) => {
                error!(job_id = %job.id, error = %message, "job failed");
                self.catalog
                    .update_queue_status(&job.file_path, JobStatus::Failed, Some(&message))
                    .await?;
                if job.retry_count + 1 < job.max_retries {
                    self.catalog.increment_retry_count(&job.id).await?;
                }
            }
        }

        Ok(())
    }

    /// Runs the dedup check, transform, and encryption for one job.
    async fn run_job(&self, job: &PendingJob, input_path: &Path) -> Result<JobOutcome, RunJobError> {
        let file_hash = hash::hash_file(input_path)
            .map_err(|e| RunJobError::Failed(format!("hashing failed: {e}")))?;

        if let Some(existing) = self.catalog.check_duplicate_by_hash(&file_hash).await? {
            info!(job_id = %job.id, asset_id = %existing.id, "duplicate content, skipping transform");
            let _ = std::fs::remove_file(input_path);
            return Ok(JobOutcome::Duplicate(format!(
                "Duplicate of existing file ID: {}",
                existing.id
            )));
        }

        let (key_bytes, key_row) = keystore::ensure_active_key(&self.catalog, &self.config.raw_key_path())
            .await
            .map_err(|e| RunJobError::Failed(e.to_string()))?;

        let file_id = catalog::generate_file_id(&job.file_path);
        let ext = input_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mime_type = catalog::mime_type_for_extension(&ext);
        let file_size_bytes = std::fs::metadata(input_path)
            .map(|m| m.len() as i64)
            .unwrap_or(0);
        let original_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let output = match job.file_type {
            FileType::Image => {
                let images_dir = self.config.assets_dir.join("images");
                image::process_image(input_path, &file_id, &images_dir)
                    .await
                    .map_err(|e| RunJobError::Failed(e.to_string()))?
            }
            FileType::Video => {
                let videos_dir = self.config.assets_dir.join("videos");
                let key_info_path = self.config.key_info_path(&file_id);
                video::process_video(
                    input_path,
                    &file_id,
                    &videos_dir,
                    &key_info_path,
                    &self.config.raw_key_path(),
                    &self.config.public_base_url,
                )
                .await
                .map_err(|e| RunJobError::Failed(e.to_string()))?
            }
        };

        for path in &output.paths_to_encrypt {
            crypto::encrypt_file(path, &key_bytes).map_err(|e| RunJobError::Failed(e.to_string()))?;
        }

        // Every artifact must exist on disk before the catalog row is
        // written (spec §5's ordering guarantee).
        for path in &output.paths_to_encrypt {
            let encrypted = crypto::encrypted_path(path);
            if !encrypted.exists() {
                return Err(RunJobError::Failed(format!(
                    "expected encrypted artifact missing: {}",
                    encrypted.display()
                )));
            }
        }
        for path in &output.finalized_paths {
            if !path.exists() {
                return Err(RunJobError::Failed(format!(
                    "expected artifact missing: {}",
                    path.display()
                )));
            }
        }

        let asset = MediaAsset {
            id: file_id,
            original_name,
            file_hash,
            file_type: job.file_type,
            mime_type: mime_type.to_string(),
            file_size_bytes,
            width: output.width,
            height: output.height,
            duration_seconds: output.duration_seconds,
            storage_path: output.storage_path,
            thumbnail_path: output.thumbnail_path,
            preview_path: output.preview_path,
            encryption_key_id: key_row.id,
            metadata: output.extra_metadata,
        };

        self.catalog.save_media_metadata(&asset).await?;
        let _ = std::fs::remove_file(input_path);

        Ok(JobOutcome::Processed)
    }
}
