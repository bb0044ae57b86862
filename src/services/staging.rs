//! Startup sweep of the staging area.
//!
//! Files left behind by a previous run are either canonical
//! (`<tx>/<study>/<series>/<instance>.dcm`, classified and waiting for upload)
//! or raw `file_<n>` leftovers of an interrupted transaction.

use crate::services::transaction::is_valid_uid;
use crate::services::upload_pipeline::{PipelineError, UploadJob, UploadQueue};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("I/O error on staging area: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot walk staging area: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Queue(#[from] PipelineError),

    #[error("staging sweep task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Canonical files found (and re-queued when recovering).
    pub staged: usize,
    /// `file_<n>` leftovers found (and deleted when recovering).
    pub leftovers: usize,
}

#[derive(Debug, Default)]
struct Scan {
    staged: Vec<UploadJob>,
    leftovers: Vec<PathBuf>,
}

/// Creates the staging root if needed and inspects what a previous run left.
/// With `recover` set, canonical files are re-queued and leftovers deleted;
/// otherwise they are only counted.
pub async fn recover_staged(
    root: &Path,
    uploads: &UploadQueue,
    recover: bool,
) -> Result<RecoveryReport, StagingError> {
    tokio::fs::create_dir_all(root).await?;

    let walk_root = root.to_path_buf();
    let found = tokio::task::spawn_blocking(move || scan(&walk_root)).await??;
    let report = RecoveryReport {
        staged: found.staged.len(),
        leftovers: found.leftovers.len(),
    };

    if !recover {
        if report.staged > 0 || report.leftovers > 0 {
            tracing::warn!(
                "🗂️  Staging area holds {} pending instances and {} partial files (set RECOVER_STAGED=true to process them)",
                report.staged,
                report.leftovers
            );
        }
        return Ok(report);
    }

    for path in found.leftovers {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove partial file");
        }
    }
    for job in found.staged {
        uploads.enqueue(job)?;
    }
    tracing::info!(
        "🗂️  Recovered {} staged instances, removed {} partial files",
        report.staged,
        report.leftovers
    );
    Ok(report)
}

fn scan(root: &Path) -> Result<Scan, StagingError> {
    let mut scan = Scan::default();
    for entry in WalkDir::new(root).min_depth(2).max_depth(4) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<&str> = relative.iter().filter_map(|c| c.to_str()).collect();
        match parts.as_slice() {
            [_tx, name] if name.starts_with("file_") => {
                scan.leftovers.push(entry.path().to_path_buf());
            }
            [_tx, study, series, file] => {
                let Some(instance) = file.strip_suffix(".dcm") else {
                    continue;
                };
                if [study, series, &instance].iter().all(|uid| is_valid_uid(uid)) {
                    scan.staged.push(UploadJob {
                        local_path: entry.path().to_path_buf(),
                        relative_key: format!("/{}/{}/{}", study, series, file),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(scan)
}
