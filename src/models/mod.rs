use std::path::PathBuf;

/// Value of the DICOM FailureReason (0008,1197) attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// 0xA700, the instance could not be written to the staging area.
    OutOfResources,
    /// 0xC000, the part's transfer or content encoding could not be undone.
    CannotUnderstand,
    /// 0x0110, the payload is not a usable DICOM instance.
    ProcessingFailure,
    /// Application-defined 0x0910: the instance does not belong to the study
    /// named in the request path.
    StudyUidMismatch,
}

impl FailureReason {
    pub fn code(self) -> u16 {
        match self {
            FailureReason::OutOfResources => 0xA700,
            FailureReason::CannotUnderstand => 0xC000,
            FailureReason::ProcessingFailure => 0x0110,
            FailureReason::StudyUidMismatch => 0x0910,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRecord {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// Absent when no external base URL is configured.
    pub retrieve_url: Option<String>,
    /// WarningReason (0008,1196).
    pub warning: Option<u16>,
}

/// An instance moved into the canonical staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInstance {
    pub local_path: PathBuf,
    /// `/study/series/instance.dcm`
    pub relative_key: String,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
}

/// Overall outcome of a STOW-RS transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 200, every instance was accepted.
    Success,
    /// 202, some instances failed.
    Partial,
    /// 400, nothing was accepted.
    Rejected,
}

impl TransactionStatus {
    /// Any failure downgrades to partial; an empty success list always wins.
    pub fn derive(accepted: usize, failed: usize) -> Self {
        if accepted == 0 {
            TransactionStatus::Rejected
        } else if failed > 0 {
            TransactionStatus::Partial
        } else {
            TransactionStatus::Success
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            TransactionStatus::Success => 200,
            TransactionStatus::Partial => 202,
            TransactionStatus::Rejected => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(TransactionStatus::derive(3, 0), TransactionStatus::Success);
        assert_eq!(TransactionStatus::derive(3, 1), TransactionStatus::Partial);
        assert_eq!(TransactionStatus::derive(0, 5), TransactionStatus::Rejected);
        assert_eq!(TransactionStatus::derive(0, 0), TransactionStatus::Rejected);
        assert_eq!(TransactionStatus::Partial.http_status(), 202);
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(FailureReason::OutOfResources.code(), 0xA700);
        assert_eq!(FailureReason::ProcessingFailure.code(), 272);
    }
}
