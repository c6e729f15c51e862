//! Shared blob store
//!
//! The only cross-process mutable resource in the system. Inputs,
//! intermediate partitions and final outputs are all blobs addressed by
//! store-relative string paths; output uniqueness comes from the
//! tmp-then-rename discipline, so the store itself needs no locking.

pub mod paths;

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Passive named blob store with atomic same-directory rename
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a whole blob
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a whole blob, creating parent directories
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Atomically rename a blob; `from` and `to` share a directory
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Delete a blob; deleting a missing blob is a no-op
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check blob existence
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List blob paths under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Time since the blob was last written
    async fn modified_age(&self, path: &str) -> Result<Duration>;

    /// Read a blob as UTF-8 and count its lines
    async fn line_count(&self, path: &str) -> Result<u64> {
        let data = self.read(path).await?;
        let text = String::from_utf8(data)
            .map_err(|e| Error::BlobStore(format!("{}: not valid UTF-8: {}", path, e)))?;
        Ok(text.lines().count() as u64)
    }

    /// Read the half-open line range `[start, end)` of a UTF-8 blob
    async fn read_line_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<String>> {
        let data = self.read(path).await?;
        let text = String::from_utf8(data)
            .map_err(|e| Error::BlobStore(format!("{}: not valid UTF-8: {}", path, e)))?;
        Ok(text
            .lines()
            .skip(start as usize)
            .take(end.saturating_sub(start) as usize)
            .map(|l| l.to_string())
            .collect())
    }
}

/// Blob store rooted at a local directory
///
/// Backed by a filesystem shared between the scheduler and all workers.
/// Rename maps to `std::fs::rename`, which is atomic within a directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::BlobStore(format!("create root {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store-relative path, rejecting traversal outside the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let relative = Path::new(trimmed);

        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(Error::BadRequest(format!(
                        "invalid blob path: {}",
                        path
                    )))
                }
            }
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| Error::BlobStore(format!("read {}: {}", path, e)))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::BlobStore(format!("mkdir for {}: {}", path, e)))?;
        }
        tokio::fs::write(&full, data)
            .await
            .map_err(|e| Error::BlobStore(format!("write {}: {}", path, e)))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        if let Some(parent) = to_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::BlobStore(format!("mkdir for {}: {}", to, e)))?;
        }
        tokio::fs::rename(&from_full, &to_full)
            .await
            .map_err(|e| Error::BlobStore(format!("rename {} -> {}: {}", from, to, e)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::BlobStore(format!("delete {}: {}", path, e))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full)
            .await
            .map_err(|e| Error::BlobStore(format!("stat {}: {}", path, e)))?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix)?;
        if !tokio::fs::try_exists(&base)
            .await
            .map_err(|e| Error::BlobStore(format!("stat {}: {}", prefix, e)))?
        {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut pending = vec![base];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::BlobStore(format!("list {}: {}", dir.display(), e)))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::BlobStore(format!("list {}: {}", dir.display(), e)))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::BlobStore(format!("stat {}: {}", path.display(), e)))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    found.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn modified_age(&self, path: &str) -> Result<Duration> {
        let full = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|e| Error::BlobStore(format!("stat {}: {}", path, e)))?;
        let modified = metadata
            .modified()
            .map_err(|e| Error::BlobStore(format!("mtime {}: {}", path, e)))?;
        Ok(modified.elapsed().unwrap_or_default())
    }
}
