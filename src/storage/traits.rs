use crate::model::{DeviceRecord, Job, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    /// A ledger entry for this file name already exists. Callers treat this
    /// as "already handled", never as a processing failure.
    #[error("ledger entry already exists for {file_name}")]
    Duplicate { file_name: String },

    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Duplicate { .. })
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Result of trying to claim a file name in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A `processing` entry was inserted; the caller owns the file.
    Claimed,
    /// Some entry (any status) already exists for the file name.
    AlreadyClaimed,
}

/// Repository over the three collections the pipeline touches: the
/// processed-file ledger, device records, and the processing error log.
///
/// Implementations must make `record` and `claim` atomic with respect to
/// file-name uniqueness; that is the only deduplication guarantee the
/// pipeline relies on.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// True if any ledger entry exists for `file_name`, whatever its status.
    async fn exists(&self, file_name: &str) -> Result<bool, StorageError>;

    /// Insert a ledger entry. Fails with [`StorageError::Duplicate`] if the
    /// file name is already present.
    async fn record(&self, entry: &ProcessedFileEntry) -> Result<(), StorageError>;

    /// Insert a `processing` placeholder for the job's file name.
    async fn claim(&self, job: &Job) -> Result<ClaimOutcome, StorageError>;

    /// Delete the entry for `file_name` if it is still `processing`.
    /// Returns whether an entry was removed.
    async fn release_claim(&self, file_name: &str) -> Result<bool, StorageError>;

    /// Turn a `processing` entry into the given terminal entry.
    /// Returns false when there was no `processing` entry to update.
    async fn complete(&self, entry: &ProcessedFileEntry) -> Result<bool, StorageError>;

    /// Delete every `processing` entry. Returns the number removed.
    async fn release_stale_claims(&self) -> Result<usize, StorageError>;

    async fn ledger_entry(&self, file_name: &str)
        -> Result<Option<ProcessedFileEntry>, StorageError>;

    /// Store all records of one file in a single batch; either all of them
    /// are stored or none.
    async fn insert_records(&self, records: &[DeviceRecord]) -> Result<(), StorageError>;

    /// One page of a device's records, newest first.
    async fn device_records(
        &self,
        device_id: &str,
        page: u64,
        limit: u64,
    ) -> Result<PaginatedResult, StorageError>;

    async fn records_by_file(&self, file_name: &str) -> Result<Vec<DeviceRecord>, StorageError>;

    async fn append_error(&self, entry: &ProcessingErrorEntry) -> Result<(), StorageError>;

    /// Processing errors recorded for a file, oldest first.
    async fn errors_for_file(
        &self,
        file_name: &str,
    ) -> Result<Vec<ProcessingErrorEntry>, StorageError>;
}
