use super::queue::JobReceiver;
use super::PipelineError;
use crate::config::types::PersistenceFailurePolicy;
use crate::ledger::Ledger;
use crate::model::{DeviceRecord, Job, ProcessedFileEntry, ProcessingErrorEntry};
use crate::parser::{ParseError, TelemetryParser};
use crate::report::ReportTrigger;
use crate::storage::Storage;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Records stored, ledger marked `success`.
    Succeeded {
        records: usize,
        reports: usize,
        report_failures: usize,
    },
    /// File rejected by the parser and moved to the errors directory.
    ParseFailed { message: String },
    /// Batch could not be stored.
    PersistFailed { message: String, relocated: bool },
}

/// Runs the per-file pipeline: parse, persist, report, ledger, relocate.
pub struct JobProcessor {
    parser: TelemetryParser,
    storage: Arc<dyn Storage>,
    ledger: Ledger,
    reports: Option<ReportTrigger>,
    archive_dir: PathBuf,
    errors_dir: PathBuf,
    on_persistence_failure: PersistenceFailurePolicy,
}

impl JobProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        reports: Option<ReportTrigger>,
        archive_dir: impl Into<PathBuf>,
        errors_dir: impl Into<PathBuf>,
        on_persistence_failure: PersistenceFailurePolicy,
    ) -> Self {
        Self {
            parser: TelemetryParser::new(),
            ledger: Ledger::new(storage.clone()),
            storage,
            reports,
            archive_dir: archive_dir.into(),
            errors_dir: errors_dir.into(),
            on_persistence_failure,
        }
    }

    pub async fn process_job(&self, job: Job) -> JobOutcome {
        info!(file_name = %job.file_name, "Processing file");

        let records = match self.parse(&job).await {
            Ok(records) => records,
            Err(e) => return self.fail_parse(&job, e.to_string()).await,
        };

        if let Err(e) = self.storage.insert_records(&records).await {
            return self.fail_persist(&job, e.to_string()).await;
        }

        let devices: BTreeSet<&str> = records.iter().map(|r| r.device_id.as_str()).collect();
        let (reports, report_failures) = self.generate_reports(&job, &devices).await;

        self.finish(&ProcessedFileEntry::success(&job)).await;
        self.relocate(&job, &self.archive_dir).await;

        info!(
            file_name = %job.file_name,
            records = records.len(),
            devices = devices.len(),
            "Successfully processed file"
        );
        JobOutcome::Succeeded {
            records: records.len(),
            reports,
            report_failures,
        }
    }

    async fn parse(&self, job: &Job) -> Result<Vec<DeviceRecord>, ParseError> {
        let parser = self.parser;
        let path = job.file_path.clone();
        let file_name = job.file_name.clone();
        flatten_parse(
            tokio::task::spawn_blocking(move || parser.parse_file(&path, &file_name)).await,
        )
    }

    async fn fail_parse(&self, job: &Job, message: String) -> JobOutcome {
        error!(file_name = %job.file_name, error = %message, "Error parsing file");

        self.append_error(ProcessingErrorEntry::for_file(&job.file_name, &message))
            .await;
        self.finish(&ProcessedFileEntry::error(job, &message)).await;
        self.relocate(job, &self.errors_dir).await;

        JobOutcome::ParseFailed { message }
    }

    async fn fail_persist(&self, job: &Job, message: String) -> JobOutcome {
        error!(file_name = %job.file_name, error = %message, "Error saving records");

        self.finish(&ProcessedFileEntry::error(job, &message)).await;
        let relocated = match self.on_persistence_failure {
            PersistenceFailurePolicy::LeaveInPlace => false,
            PersistenceFailurePolicy::MoveToErrors => {
                self.relocate(job, &self.errors_dir).await.is_some()
            }
        };

        JobOutcome::PersistFailed { message, relocated }
    }

    /// Returns (generated, failed). Report failures never fail the job.
    async fn generate_reports(&self, job: &Job, devices: &BTreeSet<&str>) -> (usize, usize) {
        let Some(reports) = &self.reports else {
            return (0, 0);
        };

        let mut generated = 0;
        let mut failed = 0;
        for device_id in devices {
            match reports.trigger(device_id).await {
                Ok(path) => {
                    info!(device_id = %device_id, path = %path.display(), "Generated report");
                    generated += 1;
                }
                Err(e) => {
                    error!(device_id = %device_id, error = %e, "Error generating report");
                    failed += 1;
                    self.append_error(ProcessingErrorEntry::for_device(
                        &job.file_name,
                        *device_id,
                        format!("report generation error: {}", e),
                    ))
                    .await;
                }
            }
        }
        (generated, failed)
    }

    async fn append_error(&self, entry: ProcessingErrorEntry) {
        if let Err(e) = self.storage.append_error(&entry).await {
            error!(file_name = %entry.file_name, error = %e, "Error saving processing error");
        }
    }

    async fn finish(&self, entry: &ProcessedFileEntry) {
        if let Err(e) = self.ledger.finish(entry).await {
            error!(file_name = %entry.file_name, error = %e, "Error saving ledger entry");
        }
    }

    async fn relocate(&self, job: &Job, dir: &Path) -> Option<PathBuf> {
        match move_into(&job.file_path, dir, &job.file_name).await {
            Ok(dest) => {
                debug!(file_name = %job.file_name, dest = %dest.display(), "Moved file");
                Some(dest)
            }
            Err(e) => {
                error!(file_name = %job.file_name, error = %e, "Error moving file");
                None
            }
        }
    }
}

fn flatten_parse(
    result: Result<Result<Vec<DeviceRecord>, ParseError>, JoinError>,
) -> Result<Vec<DeviceRecord>, ParseError> {
    result.unwrap_or_else(|e| Err(ParseError::Task(e.to_string())))
}

/// Move `src` to `dir/file_name`, creating `dir` first. Falls back to copy
/// and delete when a plain rename is not possible.
pub async fn move_into(src: &Path, dir: &Path, file_name: &str) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PipelineError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

    let dest = dir.join(file_name);
    if tokio::fs::rename(src, &dest).await.is_ok() {
        return Ok(dest);
    }

    let relocate_err = |source: std::io::Error| PipelineError::Relocate {
        from: src.to_path_buf(),
        to: dest.clone(),
        source,
    };
    tokio::fs::copy(src, &dest).await.map_err(relocate_err)?;
    tokio::fs::remove_file(src).await.map_err(relocate_err)?;
    Ok(dest)
}

/// Fixed set of workers draining one job queue.
pub struct WorkerPool {
    processor: Arc<JobProcessor>,
    size: usize,
}

impl WorkerPool {
    pub fn new(processor: Arc<JobProcessor>, size: usize) -> Self {
        Self { processor, size }
    }

    pub fn spawn(&self, queue: JobReceiver, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    self.processor.clone(),
                    queue.clone(),
                    cancel.clone(),
                ))
            })
            .collect()
    }
}

/// Pull jobs until cancelled or the queue closes. A job that has been
/// received always runs to completion.
async fn run_worker(
    worker_id: usize,
    processor: Arc<JobProcessor>,
    queue: JobReceiver,
    cancel: CancellationToken,
) {
    info!(worker_id = worker_id, "Worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => {
                    warn!(worker_id = worker_id, "Job queue closed");
                    break;
                }
            },
        };

        debug!(worker_id = worker_id, file_name = %job.file_name, "Picked up job");
        processor.process_job(job).await;
    }

    info!(worker_id = worker_id, "Worker stopping");
}
