/// Process Lifecycle Tests
///
/// These tests start the whole service through `serve` and check:
/// - Files dropped while running are processed and archived
/// - Cancellation stops every task
/// - Stale claims from a previous run are released at startup
/// - Jobs still queued at shutdown have their claims released
/// - A web server that cannot bind brings the service down

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_ingest::cli::run::{serve, RunError};
use telemetry_ingest::config::{
    Config, PipelineConfig, ReportConfig, StorageConfig, WatcherConfig, WebConfig,
};
use telemetry_ingest::model::{
    DeviceRecord, FileStatus, Job, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry,
};
use telemetry_ingest::storage::{ClaimOutcome, MemoryStorage, Storage, StorageError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path, listen: &str) -> Config {
        Config {
            watcher: WatcherConfig {
                input_dir: root.join("input"),
                output_dir: root.join("output"),
                extension: "tsv".to_string(),
                poll_interval: Duration::from_millis(20),
                workers: 2,
                queue_capacity: 10,
            },
            pipeline: PipelineConfig::default(),
            storage: StorageConfig {
                path: root.join("unused.duckdb"),
            },
            reports: ReportConfig::default(),
            web: WebConfig {
                listen: listen.to_string(),
            },
        }
    }

    /// Memory store whose record inserts take a while, so a job is still in
    /// flight when the test cancels.
    struct SlowInserts {
        inner: MemoryStorage,
        delay: Duration,
        inserting: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Storage for SlowInserts {
        async fn init_schema(&self) -> Result<(), StorageError> {
            self.inner.init_schema().await
        }

        async fn exists(&self, file_name: &str) -> Result<bool, StorageError> {
            self.inner.exists(file_name).await
        }

        async fn record(&self, entry: &ProcessedFileEntry) -> Result<(), StorageError> {
            self.inner.record(entry).await
        }

        async fn claim(&self, job: &Job) -> Result<ClaimOutcome, StorageError> {
            self.inner.claim(job).await
        }

        async fn release_claim(&self, file_name: &str) -> Result<bool, StorageError> {
            self.inner.release_claim(file_name).await
        }

        async fn complete(&self, entry: &ProcessedFileEntry) -> Result<bool, StorageError> {
            self.inner.complete(entry).await
        }

        async fn release_stale_claims(&self) -> Result<usize, StorageError> {
            self.inner.release_stale_claims().await
        }

        async fn ledger_entry(
            &self,
            file_name: &str,
        ) -> Result<Option<ProcessedFileEntry>, StorageError> {
            self.inner.ledger_entry(file_name).await
        }

        async fn insert_records(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
            self.inserting.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.insert_records(records).await
        }

        async fn device_records(
            &self,
            device_id: &str,
            page: u64,
            limit: u64,
        ) -> Result<PaginatedResult, StorageError> {
            self.inner.device_records(device_id, page, limit).await
        }

        async fn records_by_file(
            &self,
            file_name: &str,
        ) -> Result<Vec<DeviceRecord>, StorageError> {
            self.inner.records_by_file(file_name).await
        }

        async fn append_error(&self, entry: &ProcessingErrorEntry) -> Result<(), StorageError> {
            self.inner.append_error(entry).await
        }

        async fn errors_for_file(
            &self,
            file_name: &str,
        ) -> Result<Vec<ProcessingErrorEntry>, StorageError> {
            self.inner.errors_for_file(file_name).await
        }
    }

    async fn wait_for_status(storage: &MemoryStorage, file_name: &str, status: FileStatus) -> bool {
        for _ in 0..300 {
            if let Ok(Some(entry)) = storage.ledger_entry(file_name).await {
                if entry.status == status {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_serve_processes_dropped_file_and_shuts_down() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), "127.0.0.1:0");
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(serve(config, Arc::new(storage.clone()), cancel.clone()));

        // Directories are created at startup
        let input = root.path().join("input");
        for _ in 0..100 {
            if input.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Write under another extension first so a scan never sees a partial file
        std::fs::write(
            input.join("live.part"),
            "header one\nheader two\n1\tINV1\tGUID1\tMSG1\ttext\tworking\t2\tZoneA\tAddr1\n",
        )
        .unwrap();
        std::fs::rename(input.join("live.part"), input.join("live.tsv")).unwrap();

        assert!(wait_for_status(&storage, "live.tsv", FileStatus::Success).await);
        assert!(root.path().join("output/archive/live.tsv").exists());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(storage.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_serve_releases_stale_claims() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), "127.0.0.1:0");
        let storage = MemoryStorage::new();

        // A claim left over from a crashed run for a file still in the input dir
        let input = root.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(
            input.join("stale.tsv"),
            "h1\nh2\n1\tINV1\tGUID1\tMSG1\ttext\tworking\t2\tZoneA\tAddr1\n",
        )
        .unwrap();
        storage
            .claim(&Job::new(input.join("stale.tsv"), "stale.tsv"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(serve(config, Arc::new(storage.clone()), cancel.clone()));

        assert!(wait_for_status(&storage, "stale.tsv", FileStatus::Success).await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_releases_queued_jobs_on_shutdown() {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path(), "127.0.0.1:0");
        config.watcher.workers = 1;

        let input = root.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        for (i, name) in ["a.tsv", "b.tsv", "c.tsv"].iter().enumerate() {
            std::fs::write(
                input.join(name),
                format!("h1\nh2\n1\tINV1\tGUID{}\tMSG1\ttext\tworking\t2\tZoneA\tAddr1\n", i),
            )
            .unwrap();
        }

        let memory = MemoryStorage::new();
        let inserting = Arc::new(AtomicBool::new(false));
        let storage = Arc::new(SlowInserts {
            inner: memory.clone(),
            delay: Duration::from_millis(300),
            inserting: inserting.clone(),
        });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(serve(config, storage, cancel.clone()));

        for _ in 0..300 {
            if inserting.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(inserting.load(Ordering::SeqCst));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // The single worker finished the first file; the other two were still
        // queued and are free to be picked up by the next run.
        let entry = memory.ledger_entry("a.tsv").await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Success);
        assert!(root.path().join("output/archive/a.tsv").exists());
        for name in ["b.tsv", "c.tsv"] {
            assert!(!memory.exists(name).await.unwrap(), "{} still claimed", name);
            assert!(input.join(name).exists());
        }
    }

    #[tokio::test]
    async fn test_serve_fails_when_web_server_cannot_bind() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path(), "not-an-address");
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve(config, Arc::new(MemoryStorage::new()), cancel.clone()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(RunError::WebServer(_))));
        assert!(cancel.is_cancelled());
    }
}
