use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{validate_key, ObjectStorage, StorageResult};

/// Filesystem-backed object store.
///
/// Layout: `<root>/<bucket>/<key>`. Keys may contain `/`, which map to
/// subdirectories. Writes go through a temp file in the target directory and
/// are renamed into place, so readers never observe partial objects.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    /// Create a store rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let dir = path
                .parent()
                .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
            fs::create_dir_all(dir)?;

            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))??;

        debug!(bucket, key, "object stored");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Self::not_found(bucket, key)
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Self::not_found(bucket, key)
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        validate_key(bucket)?;
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> StorageResult<Vec<String>> {
            let mut keys = Vec::new();
            collect_keys(&bucket_dir, &bucket_dir, &mut keys)?;
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
    }
}

fn collect_keys(base: &Path, dir: &Path, keys: &mut Vec<String>) -> StorageResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_keys(base, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // Skip in-flight temp files from concurrent writers.
            if !key.rsplit('/').next().unwrap_or_default().starts_with(".tmp") {
                keys.push(key);
            }
        }
    }
    Ok(())
}
