use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub reports: ReportConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_extension() -> String {
    "tsv".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

impl WatcherConfig {
    pub fn errors_dir(&self) -> PathBuf {
        self.output_dir.join("errors")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.output_dir.join("archive")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub on_persistence_failure: PersistenceFailurePolicy,
}

/// What happens to an input file whose records could not be stored.
///
/// Either way the ledger entry is written with status `error`, so the
/// watcher will not pick the file up again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceFailurePolicy {
    /// Leave the file in the input directory.
    #[default]
    LeaveInPlace,
    /// Move the file to `<output_dir>/errors`.
    MoveToErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the DuckDB database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_reports_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_records")]
    pub max_records: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: default_reports_enabled(),
            max_records: default_max_records(),
        }
    }
}

fn default_reports_enabled() -> bool {
    true
}

fn default_max_records() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}
