#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use std::sync::atomic::{AtomicUsize, Ordering};

use aigc_core::error::CoreError;
use aigc_core::files::FsLocalFiles;
use aigc_core::types::DbId;
use aigc_remote::api::{
    CancelResult, JobApi, QueryData, RemoteApiError, RemoteConfigData, RemoteStatus, SubmitData,
    UploadData,
};
use aigc_remote::{FunctionOutcome, FunctionRequest, QueryOutcome, ServerError, ServerFunctions};
use aigc_tasks::{
    MemoryRecordStore, RecordStore, StaticServerRegistry, TaskContext, TaskPatch, TaskRecord,
    TaskStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

pub const SERVER: &str = "cosyvoice";
pub const VERSION: &str = "1.0.0";

/// Scripted [`ServerFunctions`]. Once a script runs out, calls answer
/// `Retry` and queries answer `Unknown`.
#[derive(Default)]
pub struct FakeServer {
    calls: Mutex<VecDeque<Result<FunctionOutcome, String>>>,
    queries: Mutex<VecDeque<QueryOutcome>>,
    pub requests: Mutex<Vec<FunctionRequest>>,
    pub queried: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_call(&self, outcome: Result<FunctionOutcome, String>) -> &Self {
        self.calls.lock().unwrap().push_back(outcome);
        self
    }

    pub fn on_query(&self, outcome: QueryOutcome) -> &Self {
        self.queries.lock().unwrap().push_back(outcome);
        self
    }

    pub fn requests(&self) -> Vec<FunctionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerFunctions for FakeServer {
    async fn call(&self, request: FunctionRequest) -> Result<FunctionOutcome, ServerError> {
        self.requests.lock().unwrap().push(request);
        let next = self.calls.lock().unwrap().pop_front();
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(msg)) => Err(ServerError::TaskFailed(msg)),
            None => Ok(FunctionOutcome::Retry),
        }
    }

    async fn query(&self, id: &str) -> Result<QueryOutcome, ServerError> {
        self.queried.lock().unwrap().push(id.to_string());
        let next = self.queries.lock().unwrap().pop_front();
        Ok(next.unwrap_or(QueryOutcome::Unknown))
    }
}

/// A successful call whose produced file is `produced`.
pub fn success_with(produced: &Path) -> FunctionOutcome {
    let now = Utc::now();
    FunctionOutcome::Success {
        start: now,
        end: now,
        data: json!({ "url": produced.display().to_string() }),
    }
}

/// Write a fake produced artifact into `dir` and return its path.
pub fn produced_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"media").unwrap();
    path
}

/// Context over an in-memory store with `server` registered.
pub fn context<P>(
    data_dir: &Path,
    server: Arc<FakeServer>,
) -> (TaskContext<P>, Arc<MemoryRecordStore<P>>)
where
    P: Clone + Send + Sync + 'static,
{
    let store = Arc::new(MemoryRecordStore::new());
    let ctx = context_over(data_dir, Arc::clone(&store) as _, server);
    (ctx, store)
}

/// Context over `store` with `server` registered.
pub fn context_over<P>(
    data_dir: &Path,
    store: Arc<dyn RecordStore<P>>,
    server: Arc<dyn ServerFunctions>,
) -> TaskContext<P>
where
    P: Send + Sync + 'static,
{
    let mut registry = StaticServerRegistry::new();
    registry.register(SERVER, VERSION, server);
    TaskContext::new(
        store,
        Arc::new(registry),
        Arc::new(FsLocalFiles::new(data_dir)),
    )
}

/// [`RecordStore`] keeping every status written through it.
pub struct RecordingStore<P> {
    pub inner: Arc<MemoryRecordStore<P>>,
    statuses: Mutex<Vec<TaskStatus>>,
}

impl<P: Clone> RecordingStore<P> {
    pub fn new(inner: Arc<MemoryRecordStore<P>>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            statuses: Mutex::new(Vec::new()),
        })
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl<P: Clone + Send + Sync + 'static> RecordStore<P> for RecordingStore<P> {
    async fn get(&self, id: DbId) -> Result<Option<TaskRecord<P>>, CoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), CoreError> {
        if let Some(status) = patch.status {
            self.statuses.lock().unwrap().push(status);
        }
        self.inner.update(id, patch).await
    }

    async fn list_unfinished(&self) -> Result<Vec<TaskRecord<P>>, CoreError> {
        self.inner.list_unfinished().await
    }
}

/// [`JobApi`] whose jobs are accepted and then run forever.
#[derive(Default)]
pub struct EndlessJobApi {
    pub submit_calls: AtomicUsize,
}

impl EndlessJobApi {
    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for EndlessJobApi {
    fn base_url(&self) -> &str {
        "http://fake-server:8899"
    }

    async fn fetch_config(&self) -> Result<RemoteConfigData, RemoteApiError> {
        Ok(RemoteConfigData::default())
    }

    async fn submit(&self, _payload: &serde_json::Value) -> Result<SubmitData, RemoteApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitData {
            token: "T1".into(),
        })
    }

    async fn query(&self, _token: &str) -> Result<QueryData, RemoteApiError> {
        Ok(QueryData {
            status: Some(RemoteStatus::Running),
            logs: None,
        })
    }

    async fn cancel(&self, _token: &str) -> CancelResult {
        CancelResult {
            code: 0,
            msg: "ok".into(),
        }
    }

    async fn upload_file(&self, local_path: &Path) -> Result<UploadData, RemoteApiError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(UploadData {
            file: format!("files/{name}"),
        })
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<(), RemoteApiError> {
        tokio::fs::write(dest, b"media").await?;
        Ok(())
    }
}
