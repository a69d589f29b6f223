use super::traits::{ClaimOutcome, Storage, StorageError};
use crate::model::{
    DeviceRecord, FileStatus, Job, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    ledger: HashMap<String, ProcessedFileEntry>,
    records: Vec<DeviceRecord>,
    errors: Vec<ProcessingErrorEntry>,
    record_write_failure: Option<String>,
}

/// In-memory implementation of Storage using HashMap
///
/// Mirrors the unique file-name constraint of the real store, so it can
/// stand in for it in pipeline tests.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `insert_records` call fail with `message`.
    pub async fn fail_record_writes(&self, message: impl Into<String>) {
        self.inner.write().await.record_write_failure = Some(message.into());
    }

    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn ledger_entries(&self) -> Vec<ProcessedFileEntry> {
        let mut entries: Vec<_> = self.inner.read().await.ledger.values().cloned().collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries
    }

    pub async fn all_errors(&self) -> Vec<ProcessingErrorEntry> {
        self.inner.read().await.errors.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn exists(&self, file_name: &str) -> Result<bool, StorageError> {
        Ok(self.inner.read().await.ledger.contains_key(file_name))
    }

    async fn record(&self, entry: &ProcessedFileEntry) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.ledger.contains_key(&entry.file_name) {
            return Err(StorageError::Duplicate {
                file_name: entry.file_name.clone(),
            });
        }
        inner.ledger.insert(entry.file_name.clone(), entry.clone());
        Ok(())
    }

    async fn claim(&self, job: &Job) -> Result<ClaimOutcome, StorageError> {
        match self.record(&ProcessedFileEntry::claim(job)).await {
            Ok(()) => Ok(ClaimOutcome::Claimed),
            Err(StorageError::Duplicate { .. }) => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) => Err(e),
        }
    }

    async fn release_claim(&self, file_name: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        match inner.ledger.get(file_name) {
            Some(entry) if entry.status == FileStatus::Processing => {
                inner.ledger.remove(file_name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, entry: &ProcessedFileEntry) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        match inner.ledger.get_mut(&entry.file_name) {
            Some(existing) if existing.status == FileStatus::Processing => {
                existing.status = entry.status;
                existing.processed_at = entry.processed_at;
                existing.error_message = entry.error_message.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stale_claims(&self) -> Result<usize, StorageError> {
        let mut inner = self.inner.write().await;
        let before = inner.ledger.len();
        inner
            .ledger
            .retain(|_, entry| entry.status != FileStatus::Processing);
        Ok(before - inner.ledger.len())
    }

    async fn ledger_entry(
        &self,
        file_name: &str,
    ) -> Result<Option<ProcessedFileEntry>, StorageError> {
        Ok(self.inner.read().await.ledger.get(file_name).cloned())
    }

    async fn insert_records(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if let Some(message) = &inner.record_write_failure {
            return Err(StorageError::Database(message.clone()));
        }
        inner.records.extend_from_slice(records);
        Ok(())
    }

    async fn device_records(
        &self,
        device_id: &str,
        page: u64,
        limit: u64,
    ) -> Result<PaginatedResult, StorageError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&DeviceRecord> = inner
            .records
            .iter()
            .filter(|r| r.device_id == device_id)
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence_number.cmp(&a.sequence_number))
        });

        let total = matching.len() as u64;
        let offset = page.saturating_sub(1).saturating_mul(limit) as usize;
        let records = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(PaginatedResult::new(records, total, page, limit))
    }

    async fn records_by_file(&self, file_name: &str) -> Result<Vec<DeviceRecord>, StorageError> {
        let inner = self.inner.read().await;
        let mut records: Vec<DeviceRecord> = inner
            .records
            .iter()
            .filter(|r| r.source_file == file_name)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence_number);
        Ok(records)
    }

    async fn append_error(&self, entry: &ProcessingErrorEntry) -> Result<(), StorageError> {
        self.inner.write().await.errors.push(entry.clone());
        Ok(())
    }

    async fn errors_for_file(
        &self,
        file_name: &str,
    ) -> Result<Vec<ProcessingErrorEntry>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .errors
            .iter()
            .filter(|e| e.file_name == file_name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(name: &str) -> Job {
        Job::new(PathBuf::from("/in").join(name), name)
    }

    #[tokio::test]
    async fn test_record_rejects_duplicate_file_name() {
        let storage = MemoryStorage::new();
        let entry = ProcessedFileEntry::success(&job("a.tsv"));

        storage.record(&entry).await.unwrap();
        let err = storage.record(&entry).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(storage.ledger_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_release_and_complete() {
        let storage = MemoryStorage::new();
        let job = job("b.tsv");

        assert_eq!(storage.claim(&job).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(storage.claim(&job).await.unwrap(), ClaimOutcome::AlreadyClaimed);
        assert!(storage.release_claim("b.tsv").await.unwrap());
        assert!(!storage.exists("b.tsv").await.unwrap());

        storage.claim(&job).await.unwrap();
        assert!(storage.complete(&ProcessedFileEntry::success(&job)).await.unwrap());
        // Terminal entries are neither released nor completed again
        assert!(!storage.release_claim("b.tsv").await.unwrap());
        assert!(!storage
            .complete(&ProcessedFileEntry::error(&job, "late"))
            .await
            .unwrap());

        let entry = storage.ledger_entry("b.tsv").await.unwrap().unwrap();
        assert_eq!(entry.status, FileStatus::Success);
    }

    #[tokio::test]
    async fn test_release_stale_claims_only_touches_processing() {
        let storage = MemoryStorage::new();
        storage.claim(&job("stale.tsv")).await.unwrap();
        storage
            .record(&ProcessedFileEntry::success(&job("done.tsv")))
            .await
            .unwrap();

        assert_eq!(storage.release_stale_claims().await.unwrap(), 1);
        assert!(!storage.exists("stale.tsv").await.unwrap());
        assert!(storage.exists("done.tsv").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let storage = MemoryStorage::new();
        storage.fail_record_writes("disk full").await;
        let err = storage.insert_records(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "database error: disk full");
    }
}
