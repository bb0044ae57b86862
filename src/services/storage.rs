use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

/// Durable destination of accepted instances.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Uploads the file at `path` under `key`, overwriting any existing object.
    async fn upload_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Human readable destination, used in logs.
    fn destination(&self) -> String;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn upload_file(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?;

        let res = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/dicom")
            .body(body)
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 put_object failed: bucket={}, key={}, error={:?}",
                self.bucket,
                key,
                e
            );
            return Err(e.into());
        }
        Ok(())
    }

    fn destination(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Composes the object key from the configured prefix and the canonical
/// `/study/series/instance.dcm` key. An empty prefix yields a key without a
/// leading slash.
pub fn object_key(prefix: &str, relative_key: &str) -> String {
    let relative = relative_key.trim_start_matches('/');
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}
