#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use stow_gateway::config::GatewayConfig;
use stow_gateway::services::reconciler::FilesystemReconciler;
use stow_gateway::services::storage::StorageService;
use stow_gateway::services::transaction::StowService;
use stow_gateway::services::upload_pipeline::UploadPipeline;
use stow_gateway::{AppState, create_app};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const CT_IMAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const BOUNDARY: &str = "DICOMwebBoundary";

pub struct MockStorageService {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.files.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn upload_file(&self, key: &str, path: &Path) -> anyhow::Result<()> {
        let data = tokio::fs::read(path).await?;
        self.files.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    fn destination(&self) -> String {
        "mock://uploads".to_string()
    }
}

fn ui(out: &mut Vec<u8>, group: u16, element: u16, value: &str) {
    let mut v = value.as_bytes().to_vec();
    if v.len() % 2 == 1 {
        v.push(0);
    }
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(b"UI");
    out.extend_from_slice(&(v.len() as u16).to_le_bytes());
    out.extend_from_slice(&v);
}

/// Explicit VR little endian Part-10 file carrying the four identifying UIDs.
pub fn dicom_instance(sop_instance: &str, study: &str, series: &str) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    ui(&mut out, 0x0002, 0x0010, "1.2.840.10008.1.2.1");
    ui(&mut out, 0x0008, 0x0016, CT_IMAGE);
    ui(&mut out, 0x0008, 0x0018, sop_instance);
    ui(&mut out, 0x0020, 0x000D, study);
    ui(&mut out, 0x0020, 0x000E, series);
    // pixel data, never looked at
    out.extend_from_slice(&[0xE0, 0x7F, 0x10, 0x00]);
    out.extend_from_slice(b"OW\0\0");
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    out
}

pub struct Part {
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl Part {
    pub fn dicom(payload: Vec<u8>) -> Self {
        Self {
            headers: vec![("Content-Type".to_string(), "application/dicom".to_string())],
            payload,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub fn multipart_body(boundary: &str, parts: &[Part]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        for (name, value) in &part.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.payload);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

pub fn related_content_type(boundary: &str) -> String {
    format!(
        "multipart/related; type=\"application/dicom\"; boundary={}",
        boundary
    )
}

/// A gateway wired like the binary, with a mock object store and a temporary
/// staging root.
pub struct TestGateway {
    pub app: Router,
    pub storage: Arc<MockStorageService>,
    pub staging: TempDir,
    pipeline: UploadPipeline,
    reconciler: JoinHandle<()>,
}

impl TestGateway {
    pub fn new(wado_url: Option<&str>) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let storage = Arc::new(MockStorageService::new());
        let config = GatewayConfig {
            bucket: "uploads".to_string(),
            prefix: "edge-01".to_string(),
            wado_url: wado_url.map(str::to_string),
            worker_count: 4,
            staging_dir: staging.path().to_path_buf(),
            ..GatewayConfig::default()
        };

        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (to_delete_tx, to_delete_rx) = mpsc::unbounded_channel();
        let pipeline = UploadPipeline::start(
            storage.clone(),
            config.prefix.clone(),
            config.worker_count,
            completed_tx,
        );
        let reconciler = tokio::spawn(FilesystemReconciler::new(to_delete_rx, completed_rx).run());

        let state = AppState {
            stow: Arc::new(StowService::new(
                config.staging_dir.clone(),
                config.wado_url.clone(),
                pipeline.queue(),
                to_delete_tx,
            )),
            config: Arc::new(config),
        };

        Self {
            app: create_app(state),
            storage,
            staging,
            pipeline,
            reconciler,
        }
    }

    /// Drops the router and waits for uploads and cleanup to finish.
    pub async fn shutdown(self) -> (Arc<MockStorageService>, TempDir) {
        drop(self.app);
        self.pipeline.join().await;
        self.reconciler.await.unwrap();
        (self.storage, self.staging)
    }
}

pub fn staged_files(root: &Path) -> Vec<std::path::PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}
