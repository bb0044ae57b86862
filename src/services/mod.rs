pub mod dicom;
pub mod reconciler;
pub mod response;
pub mod staging;
pub mod storage;
pub mod transaction;
pub mod upload_pipeline;
