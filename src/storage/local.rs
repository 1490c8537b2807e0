//! Local filesystem storage for fetched artifacts.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── arxiv_2401.01234v2_id7.pdf        # committed artifact
//! ├── arxiv_2401.01234v2_id7.meta.json  # sidecar
//! ├── arxiv_2401.01234v2_id7.pdf.part   # in-flight download (never final)
//! └── fetch_metrics.json
//! ```
//!
//! Every file lands through a temp path and a rename, so a reader never
//! observes a half-written artifact.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{AppError, Result};

/// Filesystem-safe name: `[A-Za-z0-9-_.]` kept, everything else `_`,
/// truncated to 128 characters.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect()
}

/// Artifact directory handle.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Final artifact path for a file stem.
    pub fn artifact_path(&self, stem: &str) -> PathBuf {
        self.path(&format!("{stem}.pdf"))
    }

    /// Sidecar path for a file stem.
    pub fn meta_path(&self, stem: &str) -> PathBuf {
        self.path(&format!("{stem}.meta.json"))
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        Ok(())
    }

    /// Open a `.part` file next to `final_path` for a streamed download.
    pub async fn begin(&self, final_path: &Path) -> Result<PartialArtifact> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part_path = part_path(final_path);
        let file = tokio::fs::File::create(&part_path).await?;
        Ok(PartialArtifact {
            file: Some(file),
            part_path,
            final_path: final_path.to_path_buf(),
            hasher: Sha256::new(),
            bytes: 0,
        })
    }

    /// Remove a leftover `.part` file for `final_path`, if any.
    pub async fn discard_partial(&self, final_path: &Path) {
        let part = part_path(final_path);
        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not remove {:?}: {}", part, e);
            }
        }
    }

    /// Write JSON atomically (write to temp, then rename).
    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes).await
    }

}

fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// SHA-256 hex digest and size of an existing file.
pub async fn checksum_file(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// A download in progress, hashed as it is written.
#[derive(Debug)]
pub struct PartialArtifact {
    file: Option<tokio::fs::File>,
    part_path: PathBuf,
    final_path: PathBuf,
    hasher: Sha256,
    bytes: u64,
}

/// A committed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedArtifact {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

impl PartialArtifact {
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    #[cfg(test)]
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AppError::store("artifact already closed"))?;
        file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flush and rename the `.part` file onto its final path.
    pub async fn commit(mut self) -> Result<CommittedArtifact> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        let hasher = std::mem::take(&mut self.hasher);
        Ok(CommittedArtifact {
            path: self.final_path.clone(),
            sha256: hex::encode(hasher.finalize()),
            size: self.bytes,
        })
    }

    /// Drop the `.part` file.
    pub async fn discard(mut self) {
        drop(self.file.take());
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not remove {:?}: {}", self.part_path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("arxiv_2401.01234v2"), "arxiv_2401.01234v2");
        assert_eq!(safe_filename("a b/c:d"), "a_b_c_d");
        assert_eq!(safe_filename(&"x".repeat(300)).len(), 128);
    }

    #[tokio::test]
    async fn test_commit_renames_and_hashes() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let final_path = store.artifact_path("doc_id1");

        let mut partial = store.begin(&final_path).await.unwrap();
        partial.write_chunk(b"%PDF-1.4 ").await.unwrap();
        partial.write_chunk(b"hello").await.unwrap();
        let part = partial.part_path().to_path_buf();
        assert!(part.exists());
        assert!(!final_path.exists());

        let committed = partial.commit().await.unwrap();
        assert!(final_path.exists());
        assert!(!part.exists());
        assert_eq!(committed.size, 14);
        assert_eq!(
            committed.sha256,
            hex::encode(Sha256::digest(b"%PDF-1.4 hello"))
        );

        let (sha, size) = checksum_file(&final_path).await.unwrap();
        assert_eq!(sha, committed.sha256);
        assert_eq!(size, 14);
    }

    #[tokio::test]
    async fn test_discard_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let final_path = store.artifact_path("doc_id2");

        let mut partial = store.begin(&final_path).await.unwrap();
        partial.write_chunk(b"partial").await.unwrap();
        partial.discard().await;

        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_json_is_atomic() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().join("nested"));
        let path = store.meta_path("doc_id3");

        store
            .write_json(&path, &serde_json::json!({"id": 3}))
            .await
            .unwrap();
        let loaded: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded["id"], 3);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_discard_partial_removes_leftover() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let final_path = store.artifact_path("doc_id4");

        let mut partial = store.begin(&final_path).await.unwrap();
        partial.write_chunk(b"half").await.unwrap();
        let part = partial.part_path().to_path_buf();
        drop(partial);
        assert!(part.exists());

        store.discard_partial(&final_path).await;
        assert!(!part.exists());
        store.discard_partial(&final_path).await;
    }
}
