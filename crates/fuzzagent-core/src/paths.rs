//! Local path layout shared with the user container.
//!
//! Both containers mount the disk and tmpfs volumes at the same locations, so
//! every path built here is valid on either side of the exec boundary.

use std::path::{Path, PathBuf};

use crate::settings::AppSettings;

/// Paths derived from [`AppSettings`].
#[derive(Debug, Clone)]
pub struct AgentPaths {
    disk: PathBuf,
    tmpfs: PathBuf,
    runner_binary: String,
    metrics: PathBuf,
}

impl AgentPaths {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            disk: settings.paths.volume_disk.clone(),
            tmpfs: settings.paths.volume_tmpfs.clone(),
            runner_binary: settings.paths.runner_binary.clone(),
            metrics: settings.paths.metrics.clone(),
        }
    }

    pub fn disk_volume(&self) -> &Path {
        &self.disk
    }

    pub fn runner_binary(&self) -> &str {
        &self.runner_binary
    }

    /// Fixed location of the supervisor descriptor. Rewritten before every exec.
    pub fn runner_config(&self) -> PathBuf {
        self.disk.join("runner.json")
    }

    pub fn metrics(&self) -> &Path {
        &self.metrics
    }

    pub fn seeds(&self) -> PathBuf {
        self.disk.join("seeds")
    }

    /// Working corpus the fuzzer reads from and writes new inputs to.
    pub fn corpus(&self) -> PathBuf {
        self.disk.join("corpus")
    }

    /// Unmerged corpora downloaded for a merge run, one subdirectory per run.
    pub fn unmerged_corpus(&self) -> PathBuf {
        self.disk.join("corpus_unmerged")
    }

    /// Output corpus of a merge run.
    pub fn merged_corpus(&self) -> PathBuf {
        self.disk.join("corpus_merged")
    }

    /// Crash artifacts written by the fuzzer (`-artifact_prefix`).
    pub fn crashes(&self) -> PathBuf {
        self.disk.join("crashes")
    }

    pub fn fuzzer_log(&self) -> PathBuf {
        self.tmpfs.join("fuzzer.log")
    }

    pub fn merge_log(&self) -> PathBuf {
        self.tmpfs.join("merge.log")
    }

    /// Create the working directories on the disk volume.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.seeds(),
            self.corpus(),
            self.unmerged_corpus(),
            self.merged_corpus(),
            self.crashes(),
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout_under_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = crate::fakes::test_settings(dir.path());
        let paths = AgentPaths::new(&settings);

        assert_eq!(paths.runner_config(), dir.path().join("runner.json"));
        assert!(paths.fuzzer_log().starts_with(dir.path()));

        paths.ensure_dirs().await.unwrap();
        assert!(paths.corpus().is_dir());
        assert!(paths.crashes().is_dir());
    }
}
