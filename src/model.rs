use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// One discovered input file, owned by exactly one worker once dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub file_path: PathBuf,
    pub file_name: String,
}

impl Job {
    pub fn new(file_path: PathBuf, file_name: impl Into<String>) -> Self {
        Self {
            file_path,
            file_name: file_name.into(),
        }
    }
}

/// A single parsed telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: Uuid,
    pub sequence_number: i64,
    pub inventory_id: String,
    pub device_id: String,
    pub message_id: String,
    pub text: String,
    pub message_class: String,
    pub level: i64,
    pub area: String,
    pub address: String,
    pub source_file: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome stored in the ledger for one file name.
///
/// `Processing` is the claim placeholder written by the watcher before a job
/// is queued; `Success` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processing,
    Success,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processing => "processing",
            FileStatus::Success => "success",
            FileStatus::Error => "error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(FileStatus::Processing),
            "success" => Ok(FileStatus::Success),
            "error" => Ok(FileStatus::Error),
            other => Err(format!("unknown file status: {}", other)),
        }
    }
}

/// Ledger row. `file_name` is unique across the whole ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFileEntry {
    pub file_name: String,
    pub file_path: String,
    pub processed_at: DateTime<Utc>,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessedFileEntry {
    pub fn claim(job: &Job) -> Self {
        Self {
            file_name: job.file_name.clone(),
            file_path: job.file_path.display().to_string(),
            processed_at: Utc::now(),
            status: FileStatus::Processing,
            error_message: None,
        }
    }

    pub fn success(job: &Job) -> Self {
        Self {
            status: FileStatus::Success,
            ..Self::claim(job)
        }
    }

    pub fn error(job: &Job, message: impl Into<String>) -> Self {
        Self {
            status: FileStatus::Error,
            error_message: Some(message.into()),
            ..Self::claim(job)
        }
    }
}

/// Append-only audit row. `device_id` is set for report failures only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingErrorEntry {
    pub id: Uuid,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ProcessingErrorEntry {
    pub fn for_file(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            device_id: None,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn for_device(
        file_name: impl Into<String>,
        device_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::for_file(file_name, message)
        }
    }
}

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

/// Normalized page request for the read API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Apply the read API rules: page floors at 1, limit defaults to 10 and
    /// is capped at 100. Non-positive values fall back to the defaults.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p > 0 => p as u64,
            _ => DEFAULT_PAGE,
        };
        let limit = match limit {
            Some(l) if l > 0 => (l as u64).min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        };
        Self { page, limit }
    }

    /// Same as [`PageRequest::new`] but from raw query strings; anything
    /// unparseable is treated as absent.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<i64>().ok());
        Self::new(parse(page), parse(limit))
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// One page of a device's records, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult {
    #[serde(rename = "data")]
    pub records: Vec<DeviceRecord>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl PaginatedResult {
    pub fn new(records: Vec<DeviceRecord>, total: u64, page: u64, limit: u64) -> Self {
        Self {
            records,
            total,
            page,
            limit,
            total_pages: total_pages(total, limit),
        }
    }
}

/// ceil(total / limit); zero when limit is zero.
pub fn total_pages(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 0;
    }
    total.div_ceil(limit)
}
