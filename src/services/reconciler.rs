use crate::services::upload_pipeline::{Completion, CompletionRecord};
use tokio::sync::mpsc;

/// Deletes staged files whose fate is settled: rejected before upload, or
/// confirmed by the object store.
///
/// Runs until both queues are closed and empty.
pub struct FilesystemReconciler {
    to_delete: mpsc::UnboundedReceiver<CompletionRecord>,
    completed: mpsc::UnboundedReceiver<CompletionRecord>,
}

impl FilesystemReconciler {
    pub fn new(
        to_delete: mpsc::UnboundedReceiver<CompletionRecord>,
        completed: mpsc::UnboundedReceiver<CompletionRecord>,
    ) -> Self {
        Self {
            to_delete,
            completed,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🧹 Filesystem reconciler started");
        let mut to_delete_open = true;
        let mut completed_open = true;

        while to_delete_open || completed_open {
            tokio::select! {
                record = self.to_delete.recv(), if to_delete_open => match record {
                    Some(record) => remove_staged(record).await,
                    None => to_delete_open = false,
                },
                record = self.completed.recv(), if completed_open => match record {
                    Some(record) => remove_staged(record).await,
                    None => completed_open = false,
                },
            }
        }
        tracing::info!("🧹 Filesystem reconciler stopped");
    }
}

async fn remove_staged(record: CompletionRecord) {
    let reason = match record.completion {
        Completion::Uploaded => "uploaded",
        Completion::Rejected => "rejected",
    };
    match tokio::fs::remove_file(&record.local_path).await {
        Ok(()) => tracing::debug!(
            path = %record.local_path.display(),
            reason,
            "Removed staged instance from filesystem"
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => tracing::warn!(
            path = %record.local_path.display(),
            reason,
            "Staged instance was already gone"
        ),
        Err(e) => tracing::error!(
            path = %record.local_path.display(),
            reason,
            error = %e,
            "Could not remove staged instance"
        ),
    }
}
