//! REST client for the AIGC server HTTP endpoints.
//!
//! Every endpoint is a `POST` returning the envelope `{code, msg, data}`
//! where `code == 0` means success. [`RemoteApi`] unwraps the envelope
//! and returns typed data, turning a non-zero code into
//! [`RemoteApiError::Remote`].
//!
//! The protocol sits behind the [`JobApi`] trait so the poller and the
//! orchestrator can be driven without a live server.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Envelope wrapping every response body.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload of a successful envelope.
    ///
    /// `action` names the call in the fallback message used when the
    /// server reports a failure without a message.
    pub fn into_data(self, action: &'static str) -> Result<T, RemoteApiError> {
        if self.code != 0 {
            let msg = if self.msg.is_empty() {
                format!("Remote {action} failed")
            } else {
                self.msg
            };
            return Err(RemoteApiError::Remote {
                code: self.code,
                msg,
            });
        }
        self.data.ok_or(RemoteApiError::MissingData(action))
    }
}

/// `data` of `POST /config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfigData {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub functions: serde_json::Value,
}

/// `data` of `POST /submit`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitData {
    pub token: String,
}

/// Job status reported by `POST /query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Running,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

/// `data` of `POST /query`, with `logs` already decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryData {
    #[serde(default)]
    pub status: Option<RemoteStatus>,
    #[serde(default)]
    pub logs: Option<String>,
}

/// `data` of `POST /upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadData {
    pub file: String,
}

/// Outcome of a best-effort cancel. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResult {
    pub code: i64,
    pub msg: String,
}

impl CancelResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Errors from the AIGC server REST layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Remote API error ({status}): {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The envelope carried a non-zero `code`.
    #[error("{msg}")]
    Remote { code: i64, msg: String },

    /// A successful envelope without the expected `data`.
    #[error("Remote {0} returned no data")]
    MissingData(&'static str),

    /// Writing a downloaded file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol operations against one AIGC server.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Base URL all endpoints are relative to.
    fn base_url(&self) -> &str;

    /// Server description and capabilities. Also used as a liveness probe.
    async fn fetch_config(&self) -> Result<RemoteConfigData, RemoteApiError>;

    /// Submit a job payload, returning its token.
    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmitData, RemoteApiError>;

    /// Query the status and new logs of a job.
    async fn query(&self, token: &str) -> Result<QueryData, RemoteApiError>;

    /// Ask the server to cancel a job. Failures come back as a soft
    /// [`CancelResult`] with `code == -1`.
    async fn cancel(&self, token: &str) -> CancelResult;

    /// Upload a local file, returning the server-side reference.
    async fn upload_file(&self, local_path: &Path) -> Result<UploadData, RemoteApiError>;

    /// Stream the resource at `url` into `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteApiError>;
}

/// HTTP client for a single AIGC server.
pub struct RemoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteApi {
    /// Create a new API client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://host:8899`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiEnvelope<T>, RemoteApiError> {
        let mut request = self.client.post(self.endpoint(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RemoteApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteApiError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobApi for RemoteApi {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_config(&self) -> Result<RemoteConfigData, RemoteApiError> {
        self.post_json::<RemoteConfigData>("config", None)
            .await
            .inspect_err(|e| tracing::error!(url = %self.base_url, error = %e, "Remote config failed"))?
            .into_data("config")
    }

    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmitData, RemoteApiError> {
        self.post_json::<SubmitData>("submit", Some(payload))
            .await
            .inspect_err(|e| tracing::error!(url = %self.base_url, error = %e, "Remote submit failed"))?
            .into_data("submit")
    }

    async fn query(&self, token: &str) -> Result<QueryData, RemoteApiError> {
        let body = serde_json::json!({ "token": token });
        let mut data = self
            .post_json::<QueryData>("query", Some(&body))
            .await
            .inspect_err(|e| tracing::error!(url = %self.base_url, error = %e, "Remote query failed"))?
            .into_data("query")?;
        if let Some(raw) = data.logs.take() {
            data.logs = Some(decode_logs(raw));
        }
        Ok(data)
    }

    async fn cancel(&self, token: &str) -> CancelResult {
        let body = serde_json::json!({ "token": token });
        match self.post_json::<serde_json::Value>("cancel", Some(&body)).await {
            Ok(envelope) => CancelResult {
                code: envelope.code,
                msg: envelope.msg,
            },
            Err(e) => {
                tracing::warn!(url = %self.base_url, token, error = %e, "Remote cancel failed");
                CancelResult {
                    code: -1,
                    msg: e.to_string(),
                }
            }
        }
    }

    async fn upload_file(&self, local_path: &Path) -> Result<UploadData, RemoteApiError> {
        let bytes = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response::<ApiEnvelope<UploadData>>(response)
            .await
            .inspect_err(|e| {
                tracing::error!(path = %local_path.display(), error = %e, "Remote upload failed")
            })?
            .into_data("upload")
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteApiError> {
        let response = self.client.get(url).send().await?;
        let mut response = Self::ensure_success(response).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        tracing::debug!(url, dest = %dest.display(), bytes = written, "Downloaded remote file");
        Ok(())
    }
}

/// Decode base64 log text. Undecodable input is kept as received.
pub fn decode_logs(raw: String) -> String {
    match base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to decode job logs, keeping raw text");
            raw
        }
    }
}
