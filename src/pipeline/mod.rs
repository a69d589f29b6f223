pub mod queue;
pub mod watcher;
pub mod worker;

use std::path::PathBuf;
use thiserror::Error;

pub use queue::{job_queue, EnqueueError, JobReceiver, JobSender};
pub use watcher::{DirectoryWatcher, ScanSummary};
pub use worker::{JobOutcome, JobProcessor, WorkerPool};

/// Errors that can occur during pipeline operation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory listing task failed: {0}")]
    Task(String),
}
