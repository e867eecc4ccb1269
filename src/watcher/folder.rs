//! Event watcher (spec §4.1): subscribes to filesystem creation events
//! under the intake root and enqueues eligible files as they appear.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::catalog::models::FileType;
use crate::catalog::Catalog;
use crate::error::WatcherError;

/// Watches `intake_dir` recursively and enqueues any newly created file
/// whose extension is in the recognized whitelist.
pub struct EventWatcher {
    intake_dir: PathBuf,
    catalog: Arc<Catalog>,
}

impl EventWatcher {
    pub fn new(intake_dir: PathBuf, catalog: Arc<Catalog>) -> Self {
        Self { intake_dir, catalog }
    }

    /// Starts the watch and processes events until `shutdown` is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatcherError> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )?;

        watcher.watch(&self.intake_dir, RecursiveMode::Recursive)?;
        info!(path = %self.intake_dir.display(), "watching intake directory");

        // `notify`'s callback is synchronous, so events arrive on a std
        // channel; bridge them onto a blocking thread and forward parsed
        // `DetectedFile`s over a bounded async channel the main loop selects
        // on alongside the shutdown signal.
        let (detected_tx, mut detected_rx) = tokio::sync::mpsc::channel(256);
        std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                if detected_tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                event = detected_rx.recv() => {
                    match event {
                        Some(event) => self.process_event(event).await,
                        None => {
                            warn!("watcher event channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Keep the watcher alive for the duration of the loop.
        drop(watcher);
        info!("event watcher shut down");
        Ok(())
    }

    async fn process_event(&self, event: Event) {
        if !matches!(event.kind, EventKind::Create(_)) {
            return;
        }

        for path in event.paths {
            if !path.is_file() {
                continue;
            }
            self.enqueue_if_eligible(&path).await;
        }
    }

    async fn enqueue_if_eligible(&self, path: &Path) {
        let Some(file_type) = classify(path) else {
            debug!(path = %path.display(), "ignoring unrecognized extension");
            return;
        };

        let file_path = path.to_string_lossy();
        if let Err(e) = self.catalog.add_to_queue(&file_path, file_type).await {
            error!(path = %path.display(), error = %e, "failed to enqueue detected file");
        }
    }
}

/// Classifies a path by extension per the recognized whitelist (spec §6).
pub fn classify(path: &Path) -> Option<FileType> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FileType::from_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recognized_extensions() {
        assert_eq!(classify(Path::new("a.jpg")), Some(FileType::Image));
        assert_eq!(classify(Path::new("a.MP4")), Some(FileType::Video));
        assert_eq!(classify(Path::new("a.txt")), None);
        assert_eq!(classify(Path::new("noext")), None);
    }
}
