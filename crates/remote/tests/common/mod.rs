#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aigc_core::files::FsLocalFiles;
use aigc_events::EventBus;
use aigc_remote::api::{
    CancelResult, JobApi, QueryData, RemoteApiError, RemoteConfigData, RemoteStatus, SubmitData,
    UploadData,
};
use aigc_remote::{RemoteServer, ServerConnection, ServerOptions};
use async_trait::async_trait;
use base64::Engine as _;

pub const BASE_URL: &str = "http://fake-server:8899";

/// Scripted reply to one query.
pub enum Reply {
    Status(Option<RemoteStatus>, Option<String>),
    Fail(i64, String),
}

/// In-memory [`JobApi`] replaying scripted replies and counting calls.
///
/// Once the query script runs out every query reports `running` with no
/// logs.
#[derive(Default)]
pub struct FakeApi {
    submit_error: Mutex<Option<(i64, String)>>,
    upload_error: Mutex<Option<(i64, String)>>,
    replies: Mutex<VecDeque<Reply>>,
    download_body: Mutex<Vec<u8>>,

    pub submit_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub download_calls: AtomicUsize,

    pub submitted: Mutex<Vec<serde_json::Value>>,
    /// `(file name, contents)` of every upload.
    pub uploaded: Mutex<Vec<(String, Vec<u8>)>>,
    pub downloaded_urls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn running(&self, logs: Option<&str>) -> &Self {
        self.reply(Reply::Status(
            Some(RemoteStatus::Running),
            logs.map(str::to_string),
        ))
    }

    pub fn success(&self, logs: Option<&str>) -> &Self {
        self.reply(Reply::Status(
            Some(RemoteStatus::Success),
            logs.map(str::to_string),
        ))
    }

    pub fn fail_submit(&self, code: i64, msg: &str) {
        *self.submit_error.lock().unwrap() = Some((code, msg.to_string()));
    }

    pub fn fail_upload(&self, code: i64, msg: &str) {
        *self.upload_error.lock().unwrap() = Some((code, msg.to_string()));
    }

    pub fn set_download_body(&self, body: &[u8]) {
        *self.download_body.lock().unwrap() = body.to_vec();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeApi {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn fetch_config(&self) -> Result<RemoteConfigData, RemoteApiError> {
        Ok(RemoteConfigData {
            description: Some("fake".into()),
            functions: serde_json::json!(["soundTts", "videoGen"]),
        })
    }

    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmitData, RemoteApiError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().unwrap().push(payload.clone());
        if let Some((code, msg)) = self.submit_error.lock().unwrap().clone() {
            return Err(RemoteApiError::Remote { code, msg });
        }
        Ok(SubmitData {
            token: format!("T{n}"),
        })
    }

    async fn query(&self, _token: &str) -> Result<QueryData, RemoteApiError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Status(status, logs)) => Ok(QueryData { status, logs }),
            Some(Reply::Fail(code, msg)) => Err(RemoteApiError::Remote { code, msg }),
            None => Ok(QueryData {
                status: Some(RemoteStatus::Running),
                logs: None,
            }),
        }
    }

    async fn cancel(&self, _token: &str) -> CancelResult {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        CancelResult {
            code: 0,
            msg: "ok".into(),
        }
    }

    async fn upload_file(&self, local_path: &Path) -> Result<UploadData, RemoteApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((code, msg)) = self.upload_error.lock().unwrap().clone() {
            return Err(RemoteApiError::Remote { code, msg });
        }
        let contents = tokio::fs::read(local_path).await?;
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.uploaded
            .lock()
            .unwrap()
            .push((name.clone(), contents));
        Ok(UploadData {
            file: format!("files/{name}"),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteApiError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.downloaded_urls.lock().unwrap().push(url.to_string());
        let body = self.download_body.lock().unwrap().clone();
        tokio::fs::write(dest, body).await?;
        Ok(())
    }
}

/// Log line carrying a whole result object for `job_id`.
pub fn result_marker(job_id: &str, value: serde_json::Value) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(value.to_string());
    format!("AigcPanelRunResult[{job_id}][{encoded}]\n")
}

/// Orchestrator over `api` with its data directory in `data_dir`.
pub fn server_with(
    api: Arc<FakeApi>,
    data_dir: &Path,
    options: ServerOptions,
) -> (Arc<RemoteServer>, Arc<EventBus>) {
    let mut connection = ServerConnection::new(BASE_URL, "fake");
    connection.log_file = PathBuf::from("logs/fake.log");
    connection.settings = serde_json::json!({ "gpu": 0 });
    let events = Arc::new(EventBus::default());
    let server = RemoteServer::new(
        connection,
        api,
        Arc::new(FsLocalFiles::new(data_dir)),
        Arc::clone(&events),
        options,
    );
    (Arc::new(server), events)
}
