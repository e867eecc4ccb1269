//! Reconciler (spec §4.1): periodically re-scans the intake root and
//! enqueues any eligible file not already tracked as a queue row, covering
//! events lost during watcher downtime or crashes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::config::AppConfig;

use super::folder::classify;

const SCAN_INTERVAL_SECS: u64 = 60;
const CHECK_GRANULARITY_SECS: u64 = 10;
const BASE_ERROR_BACKOFF_SECS: u64 = 30;
const ERROR_FLOOR_THRESHOLD: u32 = 5;
const ERROR_FLOOR_SECS: u64 = 120;

pub struct Reconciler {
    catalog: Arc<Catalog>,
    config: Arc<AppConfig>,
}

impl Reconciler {
    pub fn new(catalog: Arc<Catalog>, config: Arc<AppConfig>) -> Self {
        Self { catalog, config }
    }

    /// Runs the periodic reconcile loop until `shutdown` is signalled. The
    /// first pass runs synchronously before returning control, doubling as
    /// the startup sweep (spec §4.1, SPEC_FULL.md §B).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.reconcile_once().await {
                Ok(enqueued) => {
                    consecutive_errors = 0;
                    if enqueued > 0 {
                        info!(enqueued, "reconciler enqueued files");
                    }
                    Duration::from_secs(SCAN_INTERVAL_SECS)
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "reconciler pass failed");
                    let mut delay =
                        Duration::from_secs(BASE_ERROR_BACKOFF_SECS * consecutive_errors as u64);
                    if consecutive_errors >= ERROR_FLOOR_THRESHOLD {
                        delay = delay.max(Duration::from_secs(ERROR_FLOOR_SECS));
                    }
                    delay
                }
            };

            let mut remaining = sleep_for;
            let tick = Duration::from_secs(CHECK_GRANULARITY_SECS);
            loop {
                if remaining.is_zero() {
                    break;
                }
                let step = remaining.min(tick);
                tokio::select! {
                    _ = tokio::time::sleep(step) => {
                        remaining -= step;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }

        info!("reconciler shut down");
    }

    /// Walks the intake directory once, enqueuing any eligible file.
    /// Returns the number of files enqueued, or an I/O error from walking.
    pub async fn reconcile_once(&self) -> std::io::Result<usize> {
        let mut enqueued = 0;

        for entry in walkdir::WalkDir::new(&self.config.intake_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if self.enqueue_if_eligible(path).await {
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    async fn enqueue_if_eligible(&self, path: &Path) -> bool {
        let Some(file_type) = classify(path) else {
            return false;
        };

        let file_path = path.to_string_lossy();
        match self.catalog.add_to_queue(&file_path, file_type).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reconciler enqueue failed");
                false
            }
        }
    }
}
