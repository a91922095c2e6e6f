//! Local filesystem collaborator.
//!
//! [`LocalFiles`] is the narrow interface the orchestrator uses to probe,
//! allocate, write and delete local files. [`FsLocalFiles`] implements it
//! over `tokio::fs`, rooted at an application data directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Sub-directory of the data directory holding transient files.
const TEMP_DIR_NAME: &str = "temp";

#[async_trait]
pub trait LocalFiles: Send + Sync {
    /// Whether a regular file exists at `path`.
    async fn exists(&self, path: &str) -> bool;

    /// Allocate a fresh, unused temp file path with extension `ext`.
    async fn temp_path(&self, ext: &str) -> io::Result<PathBuf>;

    /// Write `contents` to `path`, replacing any existing file.
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Append `text` to the file at `path`, creating it if needed.
    async fn append_text(&self, path: &Path, text: &str) -> io::Result<()>;

    /// Delete the file at `path`. A missing file is not an error.
    async fn delete(&self, path: &Path) -> io::Result<()>;

    /// Copy `src` into the `folder` sub-directory of the data directory and
    /// return the new path.
    async fn persist(&self, src: &Path, folder: &str) -> io::Result<PathBuf>;
}

/// [`LocalFiles`] backed by the real filesystem.
#[derive(Debug, Clone)]
pub struct FsLocalFiles {
    data_dir: PathBuf,
}

impl FsLocalFiles {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Relative paths are resolved against the data directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

#[async_trait]
impl LocalFiles for FsLocalFiles {
    async fn exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn temp_path(&self, ext: &str) -> io::Result<PathBuf> {
        let dir = self.data_dir.join(TEMP_DIR_NAME);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(file_name_with_ext(ext)))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let path = self.resolve(path);
        ensure_parent(&path).await?;
        tokio::fs::write(path, contents).await
    }

    async fn append_text(&self, path: &Path, text: &str) -> io::Result<()> {
        let path = self.resolve(path);
        ensure_parent(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn persist(&self, src: &Path, folder: &str) -> io::Result<PathBuf> {
        let dir = self.data_dir.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        let ext = src.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let dest = dir.join(file_name_with_ext(ext));
        tokio::fs::copy(src, &dest).await?;
        tracing::debug!(src = %src.display(), dest = %dest.display(), "Persisted file");
        Ok(dest)
    }
}

fn file_name_with_ext(ext: &str) -> String {
    let stem = uuid::Uuid::new_v4().simple().to_string();
    match ext.trim_start_matches('.') {
        "" => stem,
        ext => format!("{stem}.{ext}"),
    }
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
