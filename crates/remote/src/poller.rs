//! Submit-and-poll loop for one remote job.
//!
//! [`JobPoller::run`] submits a payload, then queries the job on a fixed
//! interval until the server reports a terminal status, the job times
//! out, or the watch is aborted. Every query's logs are appended to the
//! server log file and inspected for results and errors, which are merged
//! into the watch's [`LauncherResult`](aigc_core::launcher::LauncherResult).
//! The outcome is delivered through the watch's one-shot settlement.
//!
//! Ticks are strictly serialised: the next query is only scheduled after
//! the previous one has been handled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aigc_core::files::LocalFiles;
use aigc_core::logs::LogInspector;
use aigc_events::{EventBus, ServerEvent, ServerEventKind};
use tokio::time::Instant;

use crate::api::{JobApi, RemoteApiError, RemoteStatus};
use crate::watch::Watch;

/// Default delay between two queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default wall-clock budget of one job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Why a job did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Submission failed; polling never started.
    #[error("{0}")]
    Submit(RemoteApiError),

    /// A status query failed. Queries are not retried.
    #[error("{0}")]
    Query(RemoteApiError),

    /// The server reported the job as failed.
    #[error("{0}")]
    Failed(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task timeout after {after_secs}s")]
    Timeout { after_secs: u64 },
}

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_JOB_TIMEOUT),
        }
    }
}

impl PollerConfig {
    /// Set the timeout in seconds. Zero or negative disables it.
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout = u64::try_from(secs)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Drives jobs on one server.
pub struct JobPoller {
    api: Arc<dyn JobApi>,
    files: Arc<dyn LocalFiles>,
    inspector: Arc<dyn LogInspector>,
    events: Arc<EventBus>,
    server_name: String,
    log_file: PathBuf,
    config: PollerConfig,
}

impl JobPoller {
    pub fn new(
        api: Arc<dyn JobApi>,
        files: Arc<dyn LocalFiles>,
        inspector: Arc<dyn LogInspector>,
        events: Arc<EventBus>,
        server_name: impl Into<String>,
        log_file: impl Into<PathBuf>,
        config: PollerConfig,
    ) -> Self {
        Self {
            api,
            files,
            inspector,
            events,
            server_name: server_name.into(),
            log_file: log_file.into(),
            config,
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Run the job on a background task. The caller awaits the watch's
    /// settlement receiver.
    pub fn spawn(
        self: &Arc<Self>,
        watch: Arc<Watch>,
        payload: serde_json::Value,
    ) -> tokio::task::JoinHandle<()> {
        let poller = Arc::clone(self);
        tokio::spawn(async move { poller.run(&watch, payload).await })
    }

    /// Submit `payload` and poll the job until `watch` is settled.
    pub async fn run(&self, watch: &Watch, payload: serde_json::Value) {
        let token = match self.api.submit(&payload).await {
            Ok(submitted) => submitted.token,
            Err(e) => {
                tracing::error!(server = %self.server_name, job_id = watch.id(), error = %e, "Job submit failed");
                watch.settle(Err(JobError::Submit(e)));
                return;
            }
        };
        watch.set_token(token.clone());
        tracing::info!(server = %self.server_name, job_id = watch.id(), token = %token, "Job submitted");

        if watch.is_settled() {
            // Aborted while the submit was in flight, before a token was known.
            let result = self.api.cancel(&token).await;
            tracing::info!(job_id = watch.id(), code = result.code, "Cancelled job submitted after abort");
            return;
        }

        self.poll(watch, &token).await;
    }

    async fn poll(&self, watch: &Watch, token: &str) {
        let started = Instant::now();
        let mut status_missing_logged = false;

        loop {
            if watch.ticks().is_cancelled() {
                return;
            }
            if let Some(limit) = self.config.timeout {
                if started.elapsed() > limit {
                    tracing::warn!(job_id = watch.id(), token, timeout_secs = limit.as_secs(), "Job timed out");
                    self.abort(
                        watch,
                        JobError::Timeout {
                            after_secs: limit.as_secs(),
                        },
                    )
                    .await;
                    return;
                }
            }

            let data = match self.api.query(token).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(job_id = watch.id(), token, error = %e, "Job query failed");
                    if !watch.settle(Err(JobError::Query(e))) {
                        tracing::debug!(job_id = watch.id(), "Query failure after settlement ignored");
                    }
                    return;
                }
            };

            if watch.is_settled() {
                tracing::debug!(job_id = watch.id(), status = ?data.status, "Poll result after settlement ignored");
                return;
            }

            if let Some(logs) = data.logs.as_deref().filter(|l| !l.is_empty()) {
                self.absorb_logs(watch, logs).await;
            }

            match data.status {
                Some(RemoteStatus::Success) => {
                    watch.launcher().lock().await.finish();
                    tracing::info!(job_id = watch.id(), token, "Job succeeded");
                    watch.settle(Ok(()));
                    return;
                }
                Some(RemoteStatus::Error) => {
                    let mut launcher = watch.launcher().lock().await;
                    launcher.finish();
                    let message = launcher
                        .error()
                        .unwrap_or_else(|| "Remote task failed".to_string());
                    drop(launcher);
                    tracing::warn!(job_id = watch.id(), token, error = %message, "Job failed");
                    watch.settle(Err(JobError::Failed(message)));
                    return;
                }
                Some(RemoteStatus::Running) => {}
                None | Some(RemoteStatus::Unknown) => {
                    if !status_missing_logged {
                        tracing::debug!(job_id = watch.id(), status = ?data.status, "No terminal status, treating as running");
                        status_missing_logged = true;
                    }
                }
            }

            tokio::select! {
                _ = watch.ticks().cancelled() => return,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Stop polling, settle the watch with `reason` and ask the server to
    /// cancel the job.
    ///
    /// Returns `false` without side effects if the watch is already settled
    /// or being aborted. At most one remote cancel is issued per watch.
    pub async fn abort(&self, watch: &Watch, reason: JobError) -> bool {
        if watch.is_settled() || !watch.begin_abort() {
            return false;
        }
        watch.ticks().cancel();
        if !watch.settle(Err(reason)) {
            return false;
        }

        if let Some(token) = watch.token() {
            let result = self.api.cancel(&token).await;
            if !result.is_ok() {
                tracing::warn!(job_id = watch.id(), token = %token, code = result.code, msg = %result.msg, "Remote cancel not acknowledged");
            }
        }
        true
    }

    async fn absorb_logs(&self, watch: &Watch, logs: &str) {
        if let Err(e) = self.files.append_text(&self.log_file, logs).await {
            tracing::warn!(log_file = %self.log_file.display(), error = %e, "Failed to append job logs");
        }

        let extracted = self.inspector.extract_result(watch.id(), logs);
        let detected = self.inspector.detect_error(logs);

        let mut launcher = watch.launcher().lock().await;
        if let Some(fields) = extracted {
            tracing::debug!(job_id = watch.id(), fields = ?fields.keys().collect::<Vec<_>>(), "Extracted job result");
            launcher.merge(fields.clone());
            self.events.publish(
                ServerEvent::new(ServerEventKind::TaskResult, &self.server_name).with_data(
                    serde_json::json!({ "id": watch.id(), "result": fields }),
                ),
            );
        }
        if let Some(error) = detected {
            tracing::warn!(job_id = watch.id(), error = %error, "Error detected in job logs");
            launcher.record_error(Some(error));
        }
    }
}
