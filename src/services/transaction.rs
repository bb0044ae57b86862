//! One STOW-RS transaction from the first body part to the result document.
//!
//! Each part is staged as `<root>/<txid>/file_<n>`, classified, and either
//! moved to `<root>/<txid>/<study>/<series>/<instance>.dcm` and queued for
//! upload, or handed to the reconciler for deletion.

use crate::models::{
    FailureReason, FailureRecord, StagedInstance, SuccessRecord, TransactionStatus,
};
use crate::multipart::{MultipartError, MultipartReader};
use crate::services::dicom::DicomIdentifiers;
use crate::services::response::{ResponseError, ResponseFormat, StoreResponse};
use crate::services::upload_pipeline::{CompletionRecord, UploadJob, UploadQueue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Longest UID allowed by PS3.5 §9.1.
const MAX_UID_LENGTH: usize = 64;

/// Digits and dots only, at most 64 characters. Also keeps UIDs safe to use
/// as path components.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= MAX_UID_LENGTH
        && uid.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
}

/// Result of one transaction, ready to render.
#[derive(Debug)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub successes: Vec<SuccessRecord>,
    pub failures: Vec<FailureRecord>,
    pub retrieve_url: Option<String>,
    /// Framing error that ended the body early, if any.
    pub parse_error: Option<MultipartError>,
}

impl TransactionOutcome {
    pub fn render(&self, format: ResponseFormat) -> Result<Vec<u8>, ResponseError> {
        StoreResponse {
            retrieve_url: self.retrieve_url.as_deref(),
            successes: &self.successes,
            failures: &self.failures,
        }
        .render(format)
    }
}

/// Stages and classifies incoming instances.
#[derive(Clone)]
pub struct StowService {
    staging_root: PathBuf,
    wado_url: Option<String>,
    uploads: UploadQueue,
    to_delete: mpsc::UnboundedSender<CompletionRecord>,
}

impl StowService {
    pub fn new(
        staging_root: impl Into<PathBuf>,
        wado_url: Option<String>,
        uploads: UploadQueue,
        to_delete: mpsc::UnboundedSender<CompletionRecord>,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            wado_url,
            uploads,
            to_delete,
        }
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.uploads
    }

    /// Consumes every body part of `reader`. `study` constrains the Study
    /// Instance UID of the accepted instances.
    pub async fn receive<R>(
        &self,
        mut reader: MultipartReader<R>,
        study: Option<&str>,
    ) -> TransactionOutcome
    where
        R: AsyncBufRead + Unpin,
    {
        let mut tx = Transaction::new(Uuid::new_v4().to_string(), self, study);
        tracing::info!(transaction = %tx.id, study = ?study, "📥 STOW-RS transaction started");

        let mut parse_error = None;
        let mut index = 0usize;
        loop {
            let mut part = match reader.next_part().await {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(e) => {
                    parse_error = Some(e);
                    break;
                }
            };
            index += 1;

            match part.read_decoded().await {
                Ok(data) => tx.stage(index, data).await,
                Err(e) if e.is_isolated() => {
                    tracing::warn!(transaction = %tx.id, part = index, error = %e, "Cannot decode body part");
                    tx.fail(String::new(), String::new(), FailureReason::CannotUnderstand);
                }
                Err(e) => {
                    parse_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = &parse_error {
            tracing::error!(transaction = %tx.id, error = %e, "Multipart body ended early");
        }
        tx.finish(parse_error)
    }

    fn instance_url(&self, staged: &StagedInstance) -> Option<String> {
        self.wado_url.as_ref().map(|base| {
            format!(
                "{}/studies/{}/series/{}/instances/{}",
                base,
                staged.study_instance_uid,
                staged.series_instance_uid,
                staged.sop_instance_uid
            )
        })
    }

    fn discard(&self, path: PathBuf) {
        if self.to_delete.send(CompletionRecord::rejected(path)).is_err() {
            tracing::warn!("Reconciler is gone, rejected file left in place");
        }
    }
}

struct Transaction<'a> {
    id: String,
    service: &'a StowService,
    study: Option<&'a str>,
    successes: Vec<SuccessRecord>,
    failures: Vec<FailureRecord>,
    last_study: Option<String>,
    /// Relative keys accepted so far.
    keys: HashSet<String>,
}

impl<'a> Transaction<'a> {
    fn new(id: String, service: &'a StowService, study: Option<&'a str>) -> Self {
        Self {
            id,
            service,
            study,
            successes: Vec::new(),
            failures: Vec::new(),
            last_study: None,
            keys: HashSet::new(),
        }
    }

    fn fail(&mut self, sop_class_uid: String, sop_instance_uid: String, reason: FailureReason) {
        self.failures.push(FailureRecord {
            sop_class_uid,
            sop_instance_uid,
            reason,
        });
    }

    fn directory(&self) -> PathBuf {
        self.service.staging_root.join(&self.id)
    }

    async fn stage(&mut self, index: usize, data: Vec<u8>) {
        let path = self.directory().join(format!("file_{}", index));
        if let Err(e) = write_staged(&path, &data).await {
            tracing::error!(transaction = %self.id, path = %path.display(), error = %e, "Cannot write staged instance");
            let (class_uid, instance_uid) = DicomIdentifiers::sop_reference(&data);
            self.fail(class_uid, instance_uid, FailureReason::OutOfResources);
            return;
        }

        let ids = match DicomIdentifiers::from_bytes(&data) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(transaction = %self.id, part = index, error = %e, "Body part is not a usable DICOM instance");
                let (class_uid, instance_uid) = DicomIdentifiers::sop_reference(&data);
                self.fail(class_uid, instance_uid, FailureReason::ProcessingFailure);
                self.service.discard(path);
                return;
            }
        };
        drop(data);

        if let Some(study) = self.study {
            if ids.study_instance_uid != study {
                tracing::warn!(
                    transaction = %self.id,
                    expected = study,
                    found = %ids.study_instance_uid,
                    "Instance belongs to another study"
                );
                self.fail(ids.sop_class_uid, ids.sop_instance_uid, FailureReason::StudyUidMismatch);
                self.service.discard(path);
                return;
            }
        }

        let staged = match self.place(&path, ids).await {
            Ok(staged) => staged,
            Err((ids, reason)) => {
                tracing::warn!(transaction = %self.id, part = index, reason, "Instance rejected");
                self.fail(ids.sop_class_uid, ids.sop_instance_uid, FailureReason::ProcessingFailure);
                self.service.discard(path);
                return;
            }
        };

        // kept when the enqueue fails: the path is then pending deletion
        self.keys.insert(staged.relative_key.clone());

        let job = UploadJob {
            local_path: staged.local_path.clone(),
            relative_key: staged.relative_key.clone(),
        };
        if let Err(e) = self.service.uploads.enqueue(job) {
            tracing::error!(transaction = %self.id, error = %e, "Cannot queue upload");
            self.fail(staged.sop_class_uid, staged.sop_instance_uid, FailureReason::OutOfResources);
            self.service.discard(staged.local_path);
            return;
        }

        tracing::debug!(transaction = %self.id, key = %staged.relative_key, "Instance accepted");
        self.successes.push(SuccessRecord {
            retrieve_url: self.service.instance_url(&staged),
            sop_class_uid: staged.sop_class_uid,
            sop_instance_uid: staged.sop_instance_uid,
            warning: None,
        });
        self.last_study = Some(staged.study_instance_uid);
    }

    /// Moves a classified file into the canonical layout.
    async fn place(
        &self,
        path: &Path,
        ids: DicomIdentifiers,
    ) -> Result<StagedInstance, (DicomIdentifiers, &'static str)> {
        let uids = [
            &ids.study_instance_uid,
            &ids.series_instance_uid,
            &ids.sop_instance_uid,
        ];
        if !uids.iter().all(|uid| is_valid_uid(uid)) {
            return Err((ids, "invalid UID"));
        }

        let relative_key = format!(
            "/{}/{}/{}.dcm",
            ids.study_instance_uid, ids.series_instance_uid, ids.sop_instance_uid
        );
        // a second copy would overwrite the first one's staged file
        if self.keys.contains(&relative_key) {
            return Err((ids, "duplicate instance"));
        }
        let series_dir = self
            .directory()
            .join(&ids.study_instance_uid)
            .join(&ids.series_instance_uid);
        let target = series_dir.join(format!("{}.dcm", ids.sop_instance_uid));

        if let Err(e) = tokio::fs::create_dir_all(&series_dir).await {
            tracing::error!(path = %series_dir.display(), error = %e, "Cannot create series directory");
            return Err((ids, "move failed"));
        }
        if let Err(e) = tokio::fs::rename(path, &target).await {
            tracing::error!(from = %path.display(), to = %target.display(), error = %e, "Cannot move staged instance");
            return Err((ids, "move failed"));
        }

        Ok(StagedInstance {
            local_path: target,
            relative_key,
            sop_class_uid: ids.sop_class_uid,
            sop_instance_uid: ids.sop_instance_uid,
            study_instance_uid: ids.study_instance_uid,
            series_instance_uid: ids.series_instance_uid,
        })
    }

    fn finish(self, parse_error: Option<MultipartError>) -> TransactionOutcome {
        let status = TransactionStatus::derive(self.successes.len(), self.failures.len());
        let study = self.study.map(str::to_string).or(self.last_study);
        let retrieve_url = match (&self.service.wado_url, study) {
            (Some(base), Some(study)) => Some(format!("{}/studies/{}", base, study)),
            _ => None,
        };

        tracing::info!(
            transaction = %self.id,
            accepted = self.successes.len(),
            failed = self.failures.len(),
            status = status.http_status(),
            "📤 STOW-RS transaction finished"
        );

        TransactionOutcome {
            transaction_id: self.id,
            status,
            successes: self.successes,
            failures: self.failures,
            retrieve_url,
            parse_error,
        }
    }
}

async fn write_staged(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, data).await
}
