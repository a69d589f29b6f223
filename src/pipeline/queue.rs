use crate::model::Job;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Why a job could not be queued. The job is handed back either way.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("job queue is full")]
    Full(Job),

    #[error("job queue is closed")]
    Closed(Job),
}

/// Create a bounded job queue with the given capacity.
///
/// The sender never blocks. The receiver can be cloned and shared by any
/// number of workers; each job is delivered to exactly one of them.
pub fn job_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        JobSender { tx },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Job>,
}

impl JobSender {
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => EnqueueError::Full(job),
            mpsc::error::TrySendError::Closed(job) => EnqueueError::Closed(job),
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    /// Wait for the next job. Returns `None` once every sender is gone and
    /// the queue is drained.
    pub async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }

    /// Take every job still waiting, without blocking on an empty queue.
    pub async fn drain(&self) -> Vec<Job> {
        let mut rx = self.rx.lock().await;
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}
