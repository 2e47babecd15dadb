//! Blob storage backends for original documents and rendered previews.
//!
//! Keys are relative `/`-separated paths such as `{owner}/{id}/{filename}`.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use docket_core::{BlobReader, Error, Result, StorageBackend};

/// Reject keys that could escape the storage root.
fn validate_key(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidInput("empty storage path".to_string()));
    }
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(Error::InvalidInput(format!("invalid storage path: {}", path)));
    }
    Ok(())
}

/// Filesystem storage backend rooted at a base directory.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_key(path)?;
        Ok(self.base_path.join(path))
    }

    /// Write, read back and delete a marker file so misconfigured data
    /// directories fail at startup instead of on the first upload.
    pub async fn validate(&self) -> Result<()> {
        let marker = ".health-check/marker.bin";
        let data = b"storage-health-check";
        self.write(marker, data).await?;
        let read_back = self.read(marker).await?;
        self.delete(marker).await?;
        let _ = fs::remove_dir(self.base_path.join(".health-check")).await;
        if read_back != data {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }
        Ok(())
    }

    async fn prepare(&self, path: &str) -> Result<(PathBuf, PathBuf)> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "file_storage: create_dir_all failed");
                e
            })?;
        }
        let temp_path = full_path.with_extension("tmp");
        Ok((full_path, temp_path))
    }

    async fn commit(&self, temp_path: &Path, full_path: &Path) -> Result<()> {
        fs::rename(temp_path, full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "file_storage: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let (full_path, temp_path) = self.prepare(path).await?;
        debug!(storage_path = %path, size = data.len(), "file_storage: write");

        // Atomic write: temp file + rename
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        self.commit(&temp_path, &full_path).await
    }

    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let (full_path, temp_path) = self.prepare(path).await?;

        let mut file = fs::File::create(&temp_path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        self.commit(&temp_path, &full_path).await?;
        debug!(storage_path = %path, size = written, "file_storage: write_stream");
        Ok(written)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        fs::read(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", path, e)))
    }

    async fn open(&self, path: &str) -> Result<BlobReader> {
        let full_path = self.full_path(path)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("open {}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        if fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

/// Process-local storage backend for tests and database-less runs.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        validate_key(path)?;
        self.blobs
            .write()
            .await
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        validate_key(path)?;
        let mut data = Vec::new();
        let written = tokio::io::copy(reader, &mut data).await?;
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(written)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no blob at {}", path)))
    }

    async fn open(&self, path: &str) -> Result<BlobReader> {
        let data = self.read(path).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(path))
    }
}
