//! Single-flight orchestrator for one AIGC server.
//!
//! [`RemoteServer`] exposes one operation per model function. A call stages
//! its media inputs, uploads a job config, runs the job through the
//! [`JobPoller`] and turns the merged launcher result into a
//! [`FunctionOutcome`]. At most one call is in flight per server; a call
//! arriving while another runs returns [`FunctionOutcome::Retry`] without
//! touching the server.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use aigc_core::files::LocalFiles;
use aigc_core::logs::{LogInspector, MarkerLogInspector};
use aigc_core::types::Timestamp;
use aigc_events::{EventBus, ServerEvent, ServerEventKind};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::api::{JobApi, RemoteApi, RemoteApiError};
use crate::function::{FunctionOutcome, FunctionRequest, ModelTask, QueryOutcome, ResultField};
use crate::poller::{JobError, JobPoller, PollerConfig};
use crate::staging::{FileStaging, StagingError};
use crate::watch::{lock, Watch};

/// Immutable description of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConnection {
    /// Base HTTP URL, e.g. `http://host:8899`.
    pub base_url: String,
    pub name: String,
    pub title: String,
    pub version: String,
    /// File the job logs are appended to.
    pub log_file: PathBuf,
    /// Injected as `setting` into every job config.
    pub settings: serde_json::Value,
}

impl ServerConnection {
    pub fn new(base_url: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base_url: base_url.into(),
            title: name.clone(),
            log_file: PathBuf::from(format!("logs/{name}.log")),
            name,
            version: String::new(),
            settings: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Tunables of a [`RemoteServer`].
#[derive(Clone)]
pub struct ServerOptions {
    pub poller: PollerConfig,
    pub inspector: Arc<dyn LogInspector>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            inspector: Arc::new(MarkerLogInspector),
        }
    }
}

/// Summary returned by [`RemoteServer::config`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub http_url: String,
    pub content: String,
    pub functions: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Api(#[from] RemoteApiError),

    /// The job finished without a result but its logs carried an error.
    #[error("{0}")]
    TaskFailed(String),

    /// The job finished without a result and without a detected error.
    #[error("Execution failed, check the model logs")]
    MissingResult,

    #[error("Failed to encode job config: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The orchestrator operations task drivers depend on.
#[async_trait]
pub trait ServerFunctions: Send + Sync {
    async fn call(&self, request: FunctionRequest) -> Result<FunctionOutcome, ServerError>;

    async fn query(&self, id: &str) -> Result<QueryOutcome, ServerError>;
}

/// Orchestrator bound to one AIGC server.
pub struct RemoteServer {
    connection: ServerConnection,
    api: Arc<dyn JobApi>,
    files: Arc<dyn LocalFiles>,
    staging: FileStaging,
    poller: Arc<JobPoller>,
    events: Arc<EventBus>,
    busy: AtomicBool,
    active: Mutex<Option<Arc<Watch>>>,
    started_at: Mutex<Option<Timestamp>>,
}

impl RemoteServer {
    pub fn new(
        connection: ServerConnection,
        api: Arc<dyn JobApi>,
        files: Arc<dyn LocalFiles>,
        events: Arc<EventBus>,
        options: ServerOptions,
    ) -> Self {
        let poller = JobPoller::new(
            Arc::clone(&api),
            Arc::clone(&files),
            options.inspector,
            Arc::clone(&events),
            connection.name.clone(),
            connection.log_file.clone(),
            options.poller,
        );
        Self {
            staging: FileStaging::new(Arc::clone(&api), Arc::clone(&files)),
            poller: Arc::new(poller),
            connection,
            api,
            files,
            events,
            busy: AtomicBool::new(false),
            active: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    /// Orchestrator talking HTTP to `connection.base_url`.
    pub fn over_http(
        connection: ServerConnection,
        files: Arc<dyn LocalFiles>,
        events: Arc<EventBus>,
        options: ServerOptions,
    ) -> Self {
        let api = Arc::new(RemoteApi::new(connection.base_url.clone()));
        Self::new(connection, api, files, events, options)
    }

    pub fn connection(&self) -> &ServerConnection {
        &self.connection
    }

    /// Whether a call is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // -- lifecycle --

    /// Server description and functions.
    pub async fn config(&self) -> Result<ServerInfo, ServerError> {
        let data = self.api.fetch_config().await?;
        Ok(ServerInfo {
            http_url: self.connection.base_url.clone(),
            content: data.description.unwrap_or_default(),
            functions: data.functions,
        })
    }

    /// Probe the server and mark it started.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.publish(ServerEventKind::Starting, json!({}));
        match self.api.fetch_config().await {
            Ok(_) => {
                *lock(&self.started_at) = Some(Utc::now());
                tracing::info!(server = %self.connection.name, url = %self.connection.base_url, "Server started");
                self.publish(ServerEventKind::Running, json!({}));
                Ok(())
            }
            Err(e) => {
                *lock(&self.started_at) = None;
                tracing::error!(server = %self.connection.name, error = %e, "Server start probe failed");
                self.publish(ServerEventKind::Error, json!({ "message": e.to_string() }));
                Err(e.into())
            }
        }
    }

    /// Whether the server was started and still answers.
    pub async fn ping(&self) -> bool {
        if lock(&self.started_at).is_none() {
            return false;
        }
        match self.api.fetch_config().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(server = %self.connection.name, error = %e, "Server ping failed");
                false
            }
        }
    }

    pub async fn stop(&self) {
        self.publish(ServerEventKind::Stopping, json!({}));
        *lock(&self.started_at) = None;
        self.publish(ServerEventKind::Stopped, json!({}));
        self.publish(ServerEventKind::Success, json!({}));
        tracing::info!(server = %self.connection.name, "Server stopped");
    }

    /// Cancel the in-flight job. Returns `false` when idle or already
    /// settled.
    pub async fn cancel(&self) -> bool {
        let active = lock(&self.active).clone();
        match active {
            Some(watch) => {
                tracing::info!(server = %self.connection.name, job_id = watch.id(), "Cancelling job");
                self.poller.abort(&watch, JobError::Cancelled).await
            }
            None => false,
        }
    }

    // -- functions --

    pub async fn sound_tts(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::SoundTts { text: text.into() };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    pub async fn sound_clone(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        prompt_audio: impl Into<String>,
        prompt_text: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::SoundClone {
            text: text.into(),
            prompt_audio: prompt_audio.into(),
            prompt_text: prompt_text.into(),
        };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    pub async fn video_gen(
        &self,
        id: impl Into<String>,
        video: impl Into<String>,
        audio: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::VideoGen {
            video: video.into(),
            audio: audio.into(),
        };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    pub async fn asr(
        &self,
        id: impl Into<String>,
        audio: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::Asr {
            audio: audio.into(),
        };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    pub async fn text_to_image(
        &self,
        id: impl Into<String>,
        prompt: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::TextToImage {
            prompt: prompt.into(),
        };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    pub async fn image_to_image(
        &self,
        id: impl Into<String>,
        image: impl Into<String>,
        prompt: impl Into<String>,
        param: serde_json::Value,
    ) -> Result<FunctionOutcome, ServerError> {
        let task = ModelTask::ImageToImage {
            image: image.into(),
            prompt: prompt.into(),
        };
        self.call(FunctionRequest::new(id, task).with_param(param))
            .await
    }

    /// Run one function call end to end.
    pub async fn call(&self, request: FunctionRequest) -> Result<FunctionOutcome, ServerError> {
        let Some(_busy) = BusyGuard::acquire(self) else {
            tracing::debug!(server = %self.connection.name, job_id = %request.id, "Server busy, asking caller to retry");
            return Ok(FunctionOutcome::Retry);
        };

        let FunctionRequest { id, param, mut task } = request;
        tracing::info!(server = %self.connection.name, job_id = %id, function = task.function_name(), "Running function");
        self.publish(ServerEventKind::TaskRunning, json!({ "id": id }));

        for input in task.media_inputs_mut() {
            let staged = self.staging.upload_if_needed(input.as_str()).await?;
            *input = staged;
        }

        let config_ref = self.upload_config(&id, &param, &task).await?;
        let payload = json!({ "entryPlaceholders": { "CONFIG": config_ref } });

        let (watch, settled) = Watch::new(id.clone());
        *lock(&self.active) = Some(Arc::clone(&watch));
        let start = Utc::now();
        self.poller.spawn(Arc::clone(&watch), payload);

        settled
            .await
            .unwrap_or_else(|_| Err(JobError::Failed("Job watcher dropped".to_string())))?;

        let launcher = watch.launcher().lock().await.clone();
        let field = task.result_field();
        let Some(value) = launcher.get(field.key()).filter(|v| !v.is_null()).cloned() else {
            return Err(match launcher.error() {
                Some(message) => ServerError::TaskFailed(message),
                None => ServerError::MissingResult,
            });
        };

        let mut data = launcher.result.clone();
        if field == ResultField::Url {
            let reference = value.as_str().ok_or(ServerError::MissingResult)?;
            let local = self.staging.download_result(reference).await?;
            data.insert(
                field.key().to_string(),
                serde_json::Value::String(local.display().to_string()),
            );
        }

        let end = launcher.end_time.unwrap_or_else(Utc::now);
        tracing::info!(server = %self.connection.name, job_id = %id, "Function succeeded");
        Ok(FunctionOutcome::Success {
            start,
            end,
            data: serde_json::Value::Object(data),
        })
    }

    /// Jobs complete within [`call`](Self::call); only the in-flight one is
    /// reported as running.
    pub fn query_status(&self, id: &str) -> QueryOutcome {
        match lock(&self.active).as_ref() {
            Some(watch) if watch.id() == id && !watch.is_settled() => QueryOutcome::Running,
            _ => QueryOutcome::Unknown,
        }
    }

    // ---- private helpers ----

    /// Write the job config to a temp file, upload it and return the
    /// server reference. The local copy is always removed.
    async fn upload_config(
        &self,
        id: &str,
        param: &serde_json::Value,
        task: &ModelTask,
    ) -> Result<String, ServerError> {
        let config = build_job_config(id, param, task, &self.connection.settings)?;
        let path = self.files.temp_path("json").await?;
        self.files.write(&path, &serde_json::to_vec(&config)?).await?;

        let uploaded = self.staging.upload(&path).await;
        if let Err(e) = self.files.delete(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete job config");
        }
        Ok(uploaded?)
    }

    fn publish(&self, kind: ServerEventKind, data: serde_json::Value) {
        self.events
            .publish(ServerEvent::new(kind, &self.connection.name).with_data(data));
    }
}

#[async_trait]
impl ServerFunctions for RemoteServer {
    async fn call(&self, request: FunctionRequest) -> Result<FunctionOutcome, ServerError> {
        RemoteServer::call(self, request).await
    }

    async fn query(&self, id: &str) -> Result<QueryOutcome, ServerError> {
        Ok(self.query_status(id))
    }
}

/// Build the `{id, mode, modelConfig, setting}` document a job reads.
pub fn build_job_config(
    id: &str,
    param: &serde_json::Value,
    task: &ModelTask,
    settings: &serde_json::Value,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut model_config = serde_json::to_value(task)?;
    if let Some(fields) = model_config.as_object_mut() {
        fields.insert("param".to_string(), param.clone());
    }
    Ok(json!({
        "id": id,
        "mode": "local",
        "modelConfig": model_config,
        "setting": settings,
    }))
}

/// Holds the single-flight slot; releasing it clears the active watch.
struct BusyGuard<'a> {
    server: &'a RemoteServer,
}

impl<'a> BusyGuard<'a> {
    fn acquire(server: &'a RemoteServer) -> Option<Self> {
        server
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { server })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if let Some(watch) = lock(&self.server.active).take() {
            watch.ticks().cancel();
        }
        self.server.busy.store(false, Ordering::SeqCst);
    }
}
