//! Idempotency ledger over the processed-file table.
//!
//! The file name is the only key. Whatever status an entry has, its
//! presence means the file is resolved or in flight and must not be
//! admitted again.

use crate::model::{Job, ProcessedFileEntry};
use crate::storage::{ClaimOutcome, Storage, StorageError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of writing a terminal ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Another writer got there first. Not a failure.
    AlreadyHandled,
}

#[derive(Clone)]
pub struct Ledger {
    storage: Arc<dyn Storage>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn exists(&self, file_name: &str) -> Result<bool, StorageError> {
        self.storage.exists(file_name).await
    }

    /// Insert a terminal entry, mapping a unique-key clash to
    /// [`RecordOutcome::AlreadyHandled`].
    pub async fn record(&self, entry: &ProcessedFileEntry) -> Result<RecordOutcome, StorageError> {
        match self.storage.record(entry).await {
            Ok(()) => Ok(RecordOutcome::Recorded),
            Err(e) if e.is_duplicate() => {
                warn!(file_name = %entry.file_name, "Ledger entry already present, treating as handled");
                Ok(RecordOutcome::AlreadyHandled)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn claim(&self, job: &Job) -> Result<ClaimOutcome, StorageError> {
        self.storage.claim(job).await
    }

    /// Give a claim back so the file is eligible on the next scan.
    pub async fn release(&self, file_name: &str) -> Result<(), StorageError> {
        if !self.storage.release_claim(file_name).await? {
            debug!(file_name = %file_name, "No claim to release");
        }
        Ok(())
    }

    /// Write the terminal outcome for a job. A claimed entry is updated in
    /// place; without a claim the entry is inserted.
    pub async fn finish(&self, entry: &ProcessedFileEntry) -> Result<RecordOutcome, StorageError> {
        if self.storage.complete(entry).await? {
            return Ok(RecordOutcome::Recorded);
        }
        self.record(entry).await
    }

    /// Drop claims left behind by a previous run that died mid-job.
    pub async fn recover(&self) -> Result<usize, StorageError> {
        let released = self.storage.release_stale_claims().await?;
        if released > 0 {
            info!(released = released, "Released stale claims from previous run");
        }
        Ok(released)
    }
}
