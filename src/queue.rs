//! Bounded hand-off between the fetcher and the normalizer workers.
//!
//! `push` waits while the queue is full. That wait is the pipeline's
//! backpressure: a slow normalizer stalls the fetcher's tick, which in turn
//! stops further claims.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use acctsync_core::SyncJob;

#[derive(Debug, Error)]
#[error("sync queue closed, job for account {} dropped", .0.account_id)]
pub struct QueueClosed(pub SyncJob);

pub fn sync_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        JobSender { inner: tx },
        JobReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Clone)]
pub struct JobSender {
    inner: mpsc::Sender<SyncJob>,
}

impl JobSender {
    pub async fn push(&self, job: SyncJob) -> Result<(), QueueClosed> {
        self.inner.send(job).await.map_err(|e| QueueClosed(e.0))
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.inner.capacity()
    }
}

/// Shared consumer end. Clones compete for jobs; each job is delivered once.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<SyncJob>>>,
}

impl JobReceiver {
    /// Next job, or `None` once every sender is gone and the queue is drained.
    pub async fn pop(&self) -> Option<SyncJob> {
        self.inner.lock().await.recv().await
    }
}
