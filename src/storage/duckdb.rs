use super::traits::{ClaimOutcome, Storage, StorageError};
use crate::model::{
    DeviceRecord, FileStatus, Job, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, sequence_number, inventory_id, device_id, message_id, text, \
     message_class, level, area, address, source_file, epoch_us(created_at)";

const LEDGER_COLUMNS: &str =
    "file_name, file_path, epoch_us(processed_at), status, error_message";

const ERROR_COLUMNS: &str = "id, file_name, device_id, message, epoch_us(created_at)";

/// DuckDB implementation of the Storage trait
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Open (or create) a database file. The parent directory is created
    /// if missing.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

/// DuckDB reports unique/primary key violations as constraint errors
/// mentioning the duplicate key.
fn is_duplicate_key(err: &duckdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("Duplicate key")
        || msg.contains("violates primary key constraint")
        || msg.contains("violates unique constraint")
}

fn conversion_error(idx: usize, ty: duckdb::types::Type, msg: String) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn micros_at(row: &Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        conversion_error(
            idx,
            duckdb::types::Type::BigInt,
            format!("invalid timestamp: {}", micros),
        )
    })
}

fn uuid_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| duckdb::Error::FromSqlConversionFailure(
        idx,
        duckdb::types::Type::Text,
        Box::new(e),
    ))
}

fn record_from_row(row: &Row<'_>) -> duckdb::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: uuid_at(row, 0)?,
        sequence_number: row.get(1)?,
        inventory_id: row.get(2)?,
        device_id: row.get(3)?,
        message_id: row.get(4)?,
        text: row.get(5)?,
        message_class: row.get(6)?,
        level: row.get(7)?,
        area: row.get(8)?,
        address: row.get(9)?,
        source_file: row.get(10)?,
        created_at: micros_at(row, 11)?,
    })
}

fn ledger_from_row(row: &Row<'_>) -> duckdb::Result<ProcessedFileEntry> {
    let status: String = row.get(3)?;
    Ok(ProcessedFileEntry {
        file_name: row.get(0)?,
        file_path: row.get(1)?,
        processed_at: micros_at(row, 2)?,
        status: status
            .parse::<FileStatus>()
            .map_err(|msg| conversion_error(3, duckdb::types::Type::Text, msg))?,
        error_message: row.get(4)?,
    })
}

fn error_from_row(row: &Row<'_>) -> duckdb::Result<ProcessingErrorEntry> {
    Ok(ProcessingErrorEntry {
        id: uuid_at(row, 0)?,
        file_name: row.get(1)?,
        device_id: row.get(2)?,
        message: row.get(3)?,
        created_at: micros_at(row, 4)?,
    })
}

fn insert_ledger_entry(conn: &Connection, entry: &ProcessedFileEntry) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO processed_files (file_name, file_path, processed_at, status, error_message)
         VALUES (?, ?, to_timestamp(? / 1000000.0), ?, ?)",
        duckdb::params![
            entry.file_name,
            entry.file_path,
            entry.processed_at.timestamp_micros(),
            entry.status.as_str(),
            entry.error_message,
        ],
    )
    .map_err(|e| {
        if is_duplicate_key(&e) {
            StorageError::Duplicate {
                file_name: entry.file_name.clone(),
            }
        } else {
            e.into()
        }
    })?;
    Ok(())
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS device_records (
                    id VARCHAR PRIMARY KEY,
                    sequence_number BIGINT NOT NULL,
                    inventory_id VARCHAR NOT NULL,
                    device_id VARCHAR NOT NULL,
                    message_id VARCHAR NOT NULL,
                    text VARCHAR NOT NULL,
                    message_class VARCHAR NOT NULL,
                    level BIGINT NOT NULL,
                    area VARCHAR NOT NULL,
                    address VARCHAR NOT NULL,
                    source_file VARCHAR NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_device_records_device ON device_records(device_id);
                CREATE INDEX IF NOT EXISTS idx_device_records_source_file ON device_records(source_file);
                CREATE INDEX IF NOT EXISTS idx_device_records_created ON device_records(created_at);
                CREATE INDEX IF NOT EXISTS idx_device_records_device_created ON device_records(device_id, created_at);

                CREATE TABLE IF NOT EXISTS processed_files (
                    file_name VARCHAR PRIMARY KEY,
                    file_path VARCHAR NOT NULL,
                    processed_at TIMESTAMPTZ NOT NULL,
                    status VARCHAR NOT NULL,
                    error_message VARCHAR
                );

                CREATE TABLE IF NOT EXISTS processing_errors (
                    id VARCHAR PRIMARY KEY,
                    file_name VARCHAR NOT NULL,
                    device_id VARCHAR,
                    message VARCHAR NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_processing_errors_file ON processing_errors(file_name);
                CREATE INDEX IF NOT EXISTS idx_processing_errors_created ON processing_errors(created_at);",
            )?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, file_name: &str) -> Result<bool, StorageError> {
        let file_name = file_name.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM processed_files WHERE file_name = ?",
                duckdb::params![file_name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn record(&self, entry: &ProcessedFileEntry) -> Result<(), StorageError> {
        let entry = entry.clone();
        self.with_conn(move |conn| insert_ledger_entry(conn, &entry))
            .await
    }

    async fn claim(&self, job: &Job) -> Result<ClaimOutcome, StorageError> {
        match self.record(&ProcessedFileEntry::claim(job)).await {
            Ok(()) => Ok(ClaimOutcome::Claimed),
            Err(StorageError::Duplicate { .. }) => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) => Err(e),
        }
    }

    async fn release_claim(&self, file_name: &str) -> Result<bool, StorageError> {
        let file_name = file_name.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM processed_files WHERE file_name = ? AND status = ?",
                duckdb::params![file_name, FileStatus::Processing.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn complete(&self, entry: &ProcessedFileEntry) -> Result<bool, StorageError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE processed_files
                 SET status = ?, processed_at = to_timestamp(? / 1000000.0), error_message = ?
                 WHERE file_name = ? AND status = ?",
                duckdb::params![
                    entry.status.as_str(),
                    entry.processed_at.timestamp_micros(),
                    entry.error_message,
                    entry.file_name,
                    FileStatus::Processing.as_str(),
                ],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn release_stale_claims(&self) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM processed_files WHERE status = ?",
                duckdb::params![FileStatus::Processing.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn ledger_entry(
        &self,
        file_name: &str,
    ) -> Result<Option<ProcessedFileEntry>, StorageError> {
        let file_name = file_name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM processed_files WHERE file_name = ?",
                LEDGER_COLUMNS
            ))?;
            let mut rows = stmt.query(duckdb::params![file_name])?;
            match rows.next()? {
                Some(row) => Ok(Some(ledger_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert_records(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let records = records.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO device_records (id, sequence_number, inventory_id, device_id, message_id,
                        text, message_class, level, area, address, source_file, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                )?;

                for record in &records {
                    stmt.execute(duckdb::params![
                        record.id.to_string(),
                        record.sequence_number,
                        record.inventory_id,
                        record.device_id,
                        record.message_id,
                        record.text,
                        record.message_class,
                        record.level,
                        record.area,
                        record.address,
                        record.source_file,
                        record.created_at.timestamp_micros(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn device_records(
        &self,
        device_id: &str,
        page: u64,
        limit: u64,
    ) -> Result<PaginatedResult, StorageError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM device_records WHERE device_id = ?",
                duckdb::params![device_id],
                |row| row.get(0),
            )?;

            let total = u64::try_from(total)
                .map_err(|_| StorageError::InvalidData(format!("negative count: {}", total)))?;

            let offset = page.saturating_sub(1).saturating_mul(limit);
            if offset >= total {
                return Ok(PaginatedResult::new(Vec::new(), total, page, limit));
            }
            let offset = i64::try_from(offset).unwrap_or(i64::MAX);
            let limit_param = i64::try_from(limit).unwrap_or(i64::MAX);

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM device_records
                 WHERE device_id = ?
                 ORDER BY created_at DESC, sequence_number DESC
                 LIMIT ? OFFSET ?",
                RECORD_COLUMNS
            ))?;
            let rows = stmt.query_map(
                duckdb::params![device_id, limit_param, offset],
                record_from_row,
            )?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }

            Ok(PaginatedResult::new(records, total, page, limit))
        })
        .await
    }

    async fn records_by_file(&self, file_name: &str) -> Result<Vec<DeviceRecord>, StorageError> {
        let file_name = file_name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM device_records WHERE source_file = ? ORDER BY sequence_number",
                RECORD_COLUMNS
            ))?;
            let rows = stmt.query_map(duckdb::params![file_name], record_from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
    }

    async fn append_error(&self, entry: &ProcessingErrorEntry) -> Result<(), StorageError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO processing_errors (id, file_name, device_id, message, created_at)
                 VALUES (?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    entry.id.to_string(),
                    entry.file_name,
                    entry.device_id,
                    entry.message,
                    entry.created_at.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn errors_for_file(
        &self,
        file_name: &str,
    ) -> Result<Vec<ProcessingErrorEntry>, StorageError> {
        let file_name = file_name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM processing_errors WHERE file_name = ? ORDER BY created_at",
                ERROR_COLUMNS
            ))?;
            let rows = stmt.query_map(duckdb::params![file_name], error_from_row)?;

            let mut errors = Vec::new();
            for row in rows {
                errors.push(row?);
            }
            Ok(errors)
        })
        .await
    }
}
