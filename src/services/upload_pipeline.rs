//! Background upload of staged instances.
//!
//! A single unbounded FIFO queue feeds a fixed pool of workers. Producers
//! (one per active transaction) hold cheap [`UploadQueue`] clones; the workers
//! share the receiving end behind an async mutex so that each job is handed to
//! exactly one of them.
//!
//! Delivery is at-most-once: a failed upload is logged and dropped. The file
//! stays in the staging area and is not handed to the reconciler.
//!
//! The queue has no bound. A slow or unavailable object store makes it grow
//! without limit.

use crate::services::storage::{StorageService, object_key};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub const DEFAULT_WORKER_COUNT: usize = 16;

/// One accepted instance waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub local_path: PathBuf,
    /// Canonical `/study/series/instance.dcm` key.
    pub relative_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The object store confirmed the write.
    Uploaded,
    /// The file was rejected before upload and must never be sent.
    Rejected,
}

/// Hand-over of a staged file to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub local_path: PathBuf,
    pub completion: Completion,
}

impl CompletionRecord {
    pub fn uploaded(local_path: PathBuf) -> Self {
        Self {
            local_path,
            completion: Completion::Uploaded,
        }
    }

    pub fn rejected(local_path: PathBuf) -> Self {
        Self {
            local_path,
            completion: Completion::Rejected,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upload pipeline is shut down")]
    Closed,
}

/// Producer handle of the pending-job queue.
#[derive(Clone)]
pub struct UploadQueue {
    sender: mpsc::UnboundedSender<UploadJob>,
    pending: Arc<AtomicUsize>,
}

impl UploadQueue {
    pub fn enqueue(&self, job: UploadJob) -> Result<(), PipelineError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            PipelineError::Closed
        })
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

pub struct UploadPipeline {
    queue: UploadQueue,
    workers: Vec<JoinHandle<()>>,
}

impl UploadPipeline {
    /// Spawns `worker_count` workers (at least one). Successful uploads are
    /// reported on `completed`.
    pub fn start(
        storage: Arc<dyn StorageService>,
        key_prefix: impl Into<String>,
        worker_count: usize,
        completed: mpsc::UnboundedSender<CompletionRecord>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let key_prefix: Arc<str> = Arc::from(key_prefix.into());
        let worker_count = worker_count.max(1);

        tracing::info!(
            "📦 Upload pipeline: {} workers -> {} (prefix: {:?})",
            worker_count,
            storage.destination(),
            key_prefix
        );

        let workers = (0..worker_count)
            .map(|id| {
                let worker = UploadWorker {
                    id,
                    receiver: receiver.clone(),
                    storage: storage.clone(),
                    key_prefix: key_prefix.clone(),
                    pending: pending.clone(),
                    completed: completed.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            queue: UploadQueue { sender, pending },
            workers,
        }
    }

    pub fn queue(&self) -> UploadQueue {
        self.queue.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Drops this pipeline's own producer handle and waits for the workers.
    /// They finish the queue and exit once every other [`UploadQueue`] clone
    /// has been dropped as well.
    pub async fn join(self) {
        drop(self.queue);
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!("Upload worker panicked: {}", e);
            }
        }
        tracing::info!("📦 Upload pipeline drained");
    }
}

struct UploadWorker {
    id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<UploadJob>>>,
    storage: Arc<dyn StorageService>,
    key_prefix: Arc<str>,
    pending: Arc<AtomicUsize>,
    completed: mpsc::UnboundedSender<CompletionRecord>,
}

impl UploadWorker {
    async fn run(self) {
        tracing::debug!(worker = self.id, "Upload worker started");
        loop {
            // the guard is released as soon as a job (or the close) arrives
            let job = self.receiver.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.upload(job).await;
        }
        tracing::debug!(worker = self.id, "Upload worker stopped");
    }

    async fn upload(&self, job: UploadJob) {
        let key = object_key(&self.key_prefix, &job.relative_key);
        tracing::debug!(
            worker = self.id,
            key = %key,
            pending = self.pending.load(Ordering::SeqCst),
            "Uploading staged instance"
        );

        match self.storage.upload_file(&key, &job.local_path).await {
            Ok(()) => {
                tracing::debug!(worker = self.id, key = %key, "Upload complete");
                if self
                    .completed
                    .send(CompletionRecord::uploaded(job.local_path))
                    .is_err()
                {
                    tracing::warn!(key = %key, "Reconciler is gone, staged file left in place");
                }
            }
            Err(e) => {
                tracing::error!(
                    worker = self.id,
                    key = %key,
                    path = %job.local_path.display(),
                    error = %e,
                    "Could not copy the instance to the object store, job dropped"
                );
            }
        }
    }
}
