//! Artifact transfer between the shared volume and object storage.
//!
//! Bucket layouts:
//!
//! ```text
//! fuzzers:  {fuzzer}/{rev}/seeds/{name}
//! data:     {fuzzer}/{rev}/corpus/merged/{name}
//!           {fuzzer}/{rev}/corpus/tmp/{run_id}/{name}
//!           {fuzzer}/{rev}/crashes/{input_id}.bin
//! ```
//!
//! Storage failures surface as the file-transfer kinds of [`AgentError`], with
//! the artifact name as details.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuzzagent_state::{ObjectStorage, StorageError};
use tracing::{error, info, warn};

use crate::error::{AgentError, Result};
use crate::settings::AppSettings;

/// Object keys in the `fuzzers` bucket.
#[derive(Debug, Clone)]
pub struct BucketFuzzers {
    pub name: String,
}

impl BucketFuzzers {
    pub fn seeds(&self, fuzzer: &str, rev: &str) -> String {
        format!("{fuzzer}/{rev}/seeds/")
    }
}

/// Object keys in the `data` bucket.
#[derive(Debug, Clone)]
pub struct BucketData {
    pub name: String,
}

impl BucketData {
    pub fn merged_corpus(&self, fuzzer: &str, rev: &str) -> String {
        format!("{fuzzer}/{rev}/corpus/merged/")
    }

    pub fn unmerged_corpus_root(&self, fuzzer: &str, rev: &str) -> String {
        format!("{fuzzer}/{rev}/corpus/tmp/")
    }

    pub fn unmerged_corpus(&self, fuzzer: &str, rev: &str, run_id: &str) -> String {
        format!("{fuzzer}/{rev}/corpus/tmp/{run_id}/")
    }

    pub fn crash(&self, fuzzer: &str, rev: &str, input_id: &str) -> String {
        format!("{fuzzer}/{rev}/crashes/{input_id}.bin")
    }
}

/// Moves seeds, corpora and crash inputs for one fuzzer revision.
#[derive(Clone)]
pub struct FileTransfer {
    storage: Arc<dyn ObjectStorage>,
    fuzzers: BucketFuzzers,
    data: BucketData,
    fuzzer_id: String,
    fuzzer_rev: String,
}

impl FileTransfer {
    pub fn new(storage: Arc<dyn ObjectStorage>, settings: &AppSettings) -> Self {
        Self {
            storage,
            fuzzers: BucketFuzzers {
                name: settings.storage.bucket_fuzzers.clone(),
            },
            data: BucketData {
                name: settings.storage.bucket_data.clone(),
            },
            fuzzer_id: settings.fuzzer.id.clone(),
            fuzzer_rev: settings.fuzzer.rev.clone(),
        }
    }

    pub fn data_bucket(&self) -> &BucketData {
        &self.data
    }

    /// Download every seed into `dir`. A fuzzer without seeds is fine.
    pub async fn download_seeds(&self, dir: &Path) -> Result<usize> {
        let prefix = self.fuzzers.seeds(&self.fuzzer_id, &self.fuzzer_rev);
        let count = self
            .download_prefix(&self.fuzzers.name, &prefix, dir, "seeds")
            .await?;
        info!(count, dir = %dir.display(), "seeds downloaded");
        Ok(count)
    }

    pub async fn download_merged_corpus(&self, dir: &Path) -> Result<usize> {
        let prefix = self.data.merged_corpus(&self.fuzzer_id, &self.fuzzer_rev);
        let count = self
            .download_prefix(&self.data.name, &prefix, dir, "merged_corpus")
            .await?;
        info!(count, dir = %dir.display(), "merged corpus downloaded");
        Ok(count)
    }

    /// Download all unmerged corpora into `dir`, keeping one subdirectory per
    /// run. Returns the consumed keys so they can be deleted after merging.
    pub async fn download_unmerged_corpus(&self, dir: &Path) -> Result<Vec<String>> {
        let prefix = self
            .data
            .unmerged_corpus_root(&self.fuzzer_id, &self.fuzzer_rev);
        let keys = self
            .storage
            .list_objects(&self.data.name, &prefix)
            .await
            .map_err(|e| download_error("unmerged_corpus", e))?;

        for key in &keys {
            self.download_object(&self.data.name, key, &prefix, dir, "unmerged_corpus")
                .await?;
        }
        info!(count = keys.len(), dir = %dir.display(), "unmerged corpus downloaded");
        Ok(keys)
    }

    pub async fn upload_crash(&self, input_id: &str, input: &[u8]) -> Result<()> {
        let key = self.data.crash(&self.fuzzer_id, &self.fuzzer_rev, input_id);
        info!(key = %key, size = input.len(), "uploading crash");
        self.storage
            .put_object(&self.data.name, &key, input)
            .await
            .map_err(|e| upload_error("crash", e))
    }

    pub async fn upload_unmerged_corpus(&self, run_id: &str, source: &Path) -> Result<usize> {
        let prefix = self
            .data
            .unmerged_corpus(&self.fuzzer_id, &self.fuzzer_rev, run_id);
        info!(source = %source.display(), prefix = %prefix, "uploading unmerged corpus");
        self.upload_dir(source, &prefix, "unmerged_corpus").await
    }

    /// Replace the merged corpus with the files in `source`.
    pub async fn upload_merged_corpus(&self, source: &Path) -> Result<usize> {
        let prefix = self.data.merged_corpus(&self.fuzzer_id, &self.fuzzer_rev);
        info!(source = %source.display(), prefix = %prefix, "uploading merged corpus");

        let previous = self
            .storage
            .list_objects(&self.data.name, &prefix)
            .await
            .map_err(|e| upload_error("merged_corpus", e))?;
        let uploaded = self.upload_dir(source, &prefix, "merged_corpus").await?;

        let kept: BTreeSet<String> = local_files(source)
            .await
            .map_err(|e| local_error(AgentError::FileUpload { artifact: "merged_corpus".into() }, e))?
            .into_iter()
            .map(|(name, _)| format!("{prefix}{name}"))
            .collect();
        let stale: Vec<String> = previous.into_iter().filter(|k| !kept.contains(k)).collect();
        self.delete_keys(&stale, "merged_corpus").await?;

        Ok(uploaded)
    }

    /// Delete consumed unmerged corpus objects.
    pub async fn delete_unmerged_corpus(&self, keys: &[String]) -> Result<()> {
        info!(count = keys.len(), "deleting unmerged corpus files");
        self.delete_keys(keys, "unmerged_corpus").await
    }

    async fn delete_keys(&self, keys: &[String], artifact: &str) -> Result<()> {
        for key in keys {
            match self.storage.delete_object(&self.data.name, key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(key = %key, "object does not exist, deleted externally?");
                }
                Err(e) => {
                    error!(key = %key, error = %e, "failed to delete {artifact} files");
                    return Err(AgentError::FileDelete {
                        artifact: artifact.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn download_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        dir: &Path,
        artifact: &str,
    ) -> Result<usize> {
        let keys = self
            .storage
            .list_objects(bucket, prefix)
            .await
            .map_err(|e| download_error(artifact, e))?;
        for key in &keys {
            self.download_object(bucket, key, prefix, dir, artifact).await?;
        }
        Ok(keys.len())
    }

    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        prefix: &str,
        dir: &Path,
        artifact: &str,
    ) -> Result<()> {
        let bytes = self
            .storage
            .get_object(bucket, key)
            .await
            .map_err(|e| download_error(artifact, e))?;
        let relative = key.strip_prefix(prefix).unwrap_or(key);
        write_local(&dir.join(relative), &bytes).await.map_err(|e| {
            local_error(
                AgentError::FileDownload {
                    artifact: artifact.to_string(),
                },
                e,
            )
        })
    }

    async fn upload_dir(&self, source: &Path, prefix: &str, artifact: &str) -> Result<usize> {
        let failed = || AgentError::FileUpload {
            artifact: artifact.to_string(),
        };
        let files = local_files(source)
            .await
            .map_err(|e| local_error(failed(), e))?;

        for (name, path) in &files {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| local_error(failed(), e))?;
            self.storage
                .put_object(&self.data.name, &format!("{prefix}{name}"), &bytes)
                .await
                .map_err(|e| upload_error(artifact, e))?;
        }
        Ok(files.len())
    }
}

fn download_error(artifact: &str, e: StorageError) -> AgentError {
    if e.is_not_found() {
        return AgentError::FileLookup {
            artifact: artifact.to_string(),
        };
    }
    error!(error = %e, "failed to download {artifact}");
    AgentError::FileDownload {
        artifact: artifact.to_string(),
    }
}

fn upload_error(artifact: &str, e: StorageError) -> AgentError {
    error!(error = %e, "failed to upload {artifact}");
    AgentError::FileUpload {
        artifact: artifact.to_string(),
    }
}

fn local_error(kind: AgentError, e: std::io::Error) -> AgentError {
    error!(error = %e, "local file access failed: {kind}");
    kind
}

async fn write_local(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// Regular files directly inside `dir`, sorted by name. A missing directory
/// holds no files.
pub(crate) async fn local_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort();
    Ok(files)
}
