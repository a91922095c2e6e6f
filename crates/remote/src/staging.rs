//! Bridges local files and the server's file-reference space.
//!
//! Inputs that live on the local disk are uploaded before they are
//! referenced in a job; result media referenced by URL in a job's output
//! are downloaded into a local temp file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aigc_core::files::LocalFiles;

use crate::api::{JobApi, RemoteApiError};

/// Extension used when a reference carries none.
const FALLBACK_EXT: &str = "bin";

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: RemoteApiError,
    },

    #[error("Download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: RemoteApiError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload/download helper bound to one server.
#[derive(Clone)]
pub struct FileStaging {
    api: Arc<dyn JobApi>,
    files: Arc<dyn LocalFiles>,
}

impl FileStaging {
    pub fn new(api: Arc<dyn JobApi>, files: Arc<dyn LocalFiles>) -> Self {
        Self { api, files }
    }

    /// Return a reference the server can resolve for `path`.
    ///
    /// Empty values and `http(s)://` references pass through untouched.
    /// An existing local file is uploaded and replaced by the server's
    /// reference. Anything else is returned unchanged: it may be an
    /// identifier the server understands rather than a file.
    pub async fn upload_if_needed(&self, path: &str) -> Result<String, StagingError> {
        if path.is_empty() || is_remote_ref(path) {
            return Ok(path.to_string());
        }
        if !self.files.exists(path).await {
            tracing::debug!(path, "Not a local file, passing through");
            return Ok(path.to_string());
        }

        self.upload(Path::new(path)).await
    }

    /// Upload `path` unconditionally and return the server reference.
    pub async fn upload(&self, path: &Path) -> Result<String, StagingError> {
        let uploaded = self
            .api
            .upload_file(path)
            .await
            .map_err(|source| StagingError::Upload {
                path: path.display().to_string(),
                source,
            })?;
        tracing::info!(path = %path.display(), remote = %uploaded.file, "Uploaded local file");
        Ok(uploaded.file)
    }

    /// Download the resource behind `remote_ref` into a new temp file and
    /// return its path.
    pub async fn download_result(&self, remote_ref: &str) -> Result<PathBuf, StagingError> {
        let url = resolve_url(self.api.base_url(), remote_ref);
        let local = self.files.temp_path(extension_of(remote_ref)).await?;
        self.api
            .download(&url, &local)
            .await
            .map_err(|source| StagingError::Download {
                url: url.clone(),
                source,
            })?;
        tracing::info!(url = %url, local = %local.display(), "Downloaded job result");
        Ok(local)
    }
}

/// Whether `path` is already an absolute `http(s)://` reference.
pub fn is_remote_ref(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Absolute URL for a server reference, joining bare paths onto `base_url`.
pub fn resolve_url(base_url: &str, remote_ref: &str) -> String {
    if is_remote_ref(remote_ref) {
        return remote_ref.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        remote_ref.trim_start_matches('/')
    )
}

/// File extension of a reference, ignoring query string and fragment.
pub fn extension_of(reference: &str) -> &str {
    let clean = reference.split(['?', '#']).next().unwrap_or(reference);
    let name = clean.rsplit('/').next().unwrap_or(clean);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => FALLBACK_EXT,
    }
}
