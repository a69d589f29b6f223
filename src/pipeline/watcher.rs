use super::queue::{EnqueueError, JobSender};
use super::PipelineError;
use crate::ledger::Ledger;
use crate::model::Job;
use crate::storage::ClaimOutcome;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one scan of the input directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub discovered: usize,
    pub enqueued: usize,
    pub already_handled: usize,
    pub queue_full: usize,
    pub failed: usize,
}

/// Periodically lists the input directory and admits unseen files.
///
/// A file is admitted by claiming its name in the ledger and then queueing
/// it. If the queue refuses the job the claim is released again, so the
/// file is picked up by a later scan.
pub struct DirectoryWatcher {
    input_dir: PathBuf,
    extension: String,
    poll_interval: Duration,
    ledger: Ledger,
    queue: JobSender,
}

impl DirectoryWatcher {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        poll_interval: Duration,
        ledger: Ledger,
        queue: JobSender,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            extension: extension.into(),
            poll_interval,
            ledger,
            queue,
        }
    }

    /// Scan on every tick until cancelled. The first scan runs immediately.
    /// Cancellation is only observed between scans.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            input_dir = %self.input_dir.display(),
            poll_interval = ?self.poll_interval,
            "Directory watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!(error = %e, "Directory scan failed");
                    }
                }
            }
        }

        info!("Directory watcher stopped");
    }

    pub async fn scan(&self) -> Result<ScanSummary, PipelineError> {
        let dir = self.input_dir.clone();
        let extension = self.extension.clone();
        let files = tokio::task::spawn_blocking(move || list_candidates(&dir, &extension))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        let mut summary = ScanSummary {
            discovered: files.len(),
            ..Default::default()
        };

        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                warn!(path = %path.display(), "Skipping file with non UTF-8 name");
                summary.failed += 1;
                continue;
            };
            let job = Job::new(path, file_name);

            match self.ledger.claim(&job).await {
                Ok(ClaimOutcome::Claimed) => {}
                Ok(ClaimOutcome::AlreadyClaimed) => {
                    debug!(file_name = %job.file_name, "File already processed");
                    summary.already_handled += 1;
                    continue;
                }
                Err(e) => {
                    error!(file_name = %job.file_name, error = %e, "Failed to claim file");
                    summary.failed += 1;
                    continue;
                }
            }

            match self.queue.try_enqueue(job) {
                Ok(()) => summary.enqueued += 1,
                Err(EnqueueError::Full(job)) => {
                    warn!(file_name = %job.file_name, "Job queue is full, skipping");
                    summary.queue_full += 1;
                    self.release(&job).await;
                }
                Err(EnqueueError::Closed(job)) => {
                    warn!(file_name = %job.file_name, "Job queue is closed, skipping");
                    summary.failed += 1;
                    self.release(&job).await;
                }
            }
        }

        if summary.enqueued > 0 || summary.queue_full > 0 {
            info!(
                discovered = summary.discovered,
                enqueued = summary.enqueued,
                queue_full = summary.queue_full,
                queue_free = self.queue.available(),
                "Scan complete"
            );
        }
        Ok(summary)
    }

    async fn release(&self, job: &Job) {
        if let Err(e) = self.ledger.release(&job.file_name).await {
            error!(file_name = %job.file_name, error = %e, "Failed to release claim");
        }
    }
}

/// Regular files in `dir` whose extension matches exactly, sorted by name.
pub fn list_candidates(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PipelineError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::job_queue;
    use crate::storage::{MemoryStorage, Storage};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "h1\nh2\n").unwrap();
    }

    #[test]
    fn test_list_candidates_filters_extension() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.tsv");
        touch(dir.path(), "a.tsv");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "upper.TSV");
        std::fs::create_dir(dir.path().join("nested.tsv")).unwrap();

        let files = list_candidates(dir.path(), "tsv").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.tsv", "b.tsv"]);
    }

    #[test]
    fn test_list_candidates_missing_dir() {
        let err = list_candidates(Path::new("/nonexistent/input"), "tsv").unwrap_err();
        assert!(matches!(err, PipelineError::ReadDir { .. }));
    }

    #[tokio::test]
    async fn test_scan_claims_and_enqueues_once() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.tsv");
        touch(dir.path(), "b.tsv");

        let storage = MemoryStorage::new();
        let ledger = Ledger::new(Arc::new(storage.clone()));
        let (tx, rx) = job_queue(10);
        let watcher = DirectoryWatcher::new(dir.path(), "tsv", Duration::from_secs(1), ledger, tx);

        let first = watcher.scan().await.unwrap();
        assert_eq!(first.enqueued, 2);

        // Claims are still in place, so nothing is admitted twice
        let second = watcher.scan().await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.already_handled, 2);

        assert_eq!(rx.recv().await.unwrap().file_name, "a.tsv");
        assert_eq!(rx.recv().await.unwrap().file_name, "b.tsv");
    }

    #[tokio::test]
    async fn test_full_queue_releases_claim() {
        let dir = TempDir::new().unwrap();
        for name in ["a.tsv", "b.tsv", "c.tsv"] {
            touch(dir.path(), name);
        }

        let storage = MemoryStorage::new();
        let ledger = Ledger::new(Arc::new(storage.clone()));
        let (tx, rx) = job_queue(1);
        let watcher = DirectoryWatcher::new(dir.path(), "tsv", Duration::from_secs(1), ledger, tx);

        let summary = watcher.scan().await.unwrap();
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.queue_full, 2);
        assert!(!storage.exists("b.tsv").await.unwrap());
        assert!(!storage.exists("c.tsv").await.unwrap());

        rx.recv().await.unwrap();
        let summary = watcher.scan().await.unwrap();
        assert_eq!(summary.enqueued, 1);
        assert_eq!(rx.recv().await.unwrap().file_name, "b.tsv");
    }

    #[tokio::test]
    async fn test_scan_missing_input_dir() {
        let ledger = Ledger::new(Arc::new(MemoryStorage::new()));
        let (tx, _rx) = job_queue(1);
        let watcher = DirectoryWatcher::new(
            "/nonexistent/input",
            "tsv",
            Duration::from_secs(1),
            ledger,
            tx,
        );

        let err = watcher.scan().await.unwrap_err();
        assert!(matches!(err, PipelineError::ReadDir { .. }));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(Arc::new(MemoryStorage::new()));
        let (tx, _rx) = job_queue(1);
        let watcher = DirectoryWatcher::new(dir.path(), "tsv", Duration::from_millis(10), ledger, tx);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
