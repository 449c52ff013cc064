//! Object storage for downloaded media.
//!
//! Objects are addressed by `(bucket, path)`. `put` overwrites, so
//! re-processing a message replaces its object instead of duplicating it.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage_s3::S3ObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket that new uploads go to.
    fn default_bucket(&self) -> &str;

    /// Store `bytes` at `path`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Public URL of an object.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Remove objects in bulk. Missing objects are not an error.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError>;
}

/// Build the object store selected by `[storage].backend`.
pub fn create_store(config: &StorageConfig) -> anyhow::Result<Box<dyn ObjectStore>> {
    match config.backend.as_str() {
        "fs" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.root must be set for the fs backend"))?;
            let base = config
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("file://{}", root.display()));
            Ok(Box::new(FsObjectStore::new(root, &config.bucket, &base)))
        }
        "s3" => Ok(Box::new(S3ObjectStore::from_config(config)?)),
        other => anyhow::bail!("Unknown storage backend: '{}'", other),
    }
}

/// Stores objects as files under `{root}/{bucket}/{path}`.
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: PathBuf, bucket: &str, public_base_url: &str) -> Self {
        Self {
            root,
            bucket: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve an object path, refusing anything that would escape the root.
    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() || bucket.is_empty() || bucket.contains(['/', '\\']) {
            return Err(StorageError::InvalidPath(format!("{}/{}", bucket, path)));
        }
        Ok(self.root.join(bucket).join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let target = self.resolve(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
