use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::config::{AppConfig, STORAGE_BACKEND_LOCAL};
use crate::s3;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Backend name recorded on document versions (`s3` | `local`).
    fn backend_name(&self) -> &'static str;

    /// Whether `presign_get_object` yields usable URLs. Backends that
    /// return false are served by streaming through the API instead.
    fn supports_presigned_urls(&self) -> bool {
        true
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Builds the storage backend selected by `STORAGE_BACKEND`.
pub async fn build_storage(config: &AppConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.storage_backend.as_str() {
        STORAGE_BACKEND_LOCAL => {
            let root = config
                .local_storage_root
                .as_deref()
                .context("LOCAL_STORAGE_ROOT must be set for the local storage backend")?;
            Ok(Arc::new(LocalStorage::new(root)))
        }
        _ => {
            let client = s3::build_client(config).await?;
            let bucket = config
                .s3_bucket
                .clone()
                .context("S3_BUCKET must be set for the s3 storage backend")?;
            Ok(Arc::new(S3Storage::new(client, bucket)))
        }
    }
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .context("failed to upload object to S3")?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to download object from S3")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("failed to read object stream")?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to delete object from S3")?;
        Ok(())
    }
}

/// Filesystem-backed storage for single-node deployments. Object keys
/// map to paths under the configured root.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => bail!("object key {key:?} escapes the storage root"),
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn supports_presigned_urls(&self) -> bool {
        false
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<String>,
        _content_disposition: Option<String>,
    ) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create storage directory")?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write object {key}"))?;
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, _expires_in: Duration) -> Result<String> {
        bail!("local storage does not support presigned URLs (key {key})")
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object {key}"))?;
        Ok(bytes)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete object {key}")),
        }
    }
}
