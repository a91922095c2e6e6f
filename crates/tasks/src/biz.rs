//! The per-task-type contract the [`TaskDriver`](crate::driver::TaskDriver)
//! drives, and the shared plumbing its implementations build on.

use std::path::Path;
use std::sync::Arc;

use aigc_core::files::LocalFiles;
use aigc_core::types::DbId;
use aigc_remote::{FunctionOutcome, FunctionRequest, QueryOutcome, ServerFunctions};
use async_trait::async_trait;
use chrono::Utc;

use crate::error::TaskError;
use crate::record::{TaskPatch, TaskRecord, TaskStatus};
use crate::store::{RecordStore, ServerRegistry};

/// How an unfinished record resumes after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Never reached the server: run from the start.
    Run,
    /// May still be running on the server: query it.
    Query,
}

impl Resume {
    /// Resume mode for `record`, `None` for terminal records.
    ///
    /// A `running` record without a job id was never accepted by its
    /// server and runs again.
    pub fn for_record<P>(record: &TaskRecord<P>) -> Option<Self> {
        match record.status {
            TaskStatus::Wait => Some(Self::Run),
            TaskStatus::Running if record.job_id.is_none() => Some(Self::Run),
            TaskStatus::Running | TaskStatus::Querying => Some(Self::Query),
            TaskStatus::Success | TaskStatus::Fail => None,
        }
    }
}

/// Result of [`TaskBiz::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Success,
    Querying,
    Retry,
}

/// Result of [`TaskBiz::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Success,
    Running,
    /// The server no longer knows the job.
    Lost,
}

/// Lifecycle hooks of one task type.
#[async_trait]
pub trait TaskBiz: Send + Sync {
    /// Task type name, e.g. `VideoGen`.
    fn name(&self) -> &'static str;

    /// Unfinished records and how each resumes.
    async fn restore(&self) -> Result<Vec<(DbId, Resume)>, TaskError>;

    async fn run(&self, id: DbId) -> Result<RunState, TaskError>;

    async fn query(&self, id: DbId) -> Result<QueryState, TaskError>;

    async fn on_success(&self, id: DbId) -> Result<(), TaskError>;

    async fn on_fail(&self, id: DbId, msg: &str) -> Result<(), TaskError>;

    /// Persist `patch`; its `result` is merged with the stored map.
    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), TaskError>;
}

/// Collaborators and steps shared by every [`TaskBiz`] implementation.
pub struct TaskContext<P> {
    store: Arc<dyn RecordStore<P>>,
    servers: Arc<dyn ServerRegistry>,
    files: Arc<dyn LocalFiles>,
}

impl<P> Clone for TaskContext<P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            servers: Arc::clone(&self.servers),
            files: Arc::clone(&self.files),
        }
    }
}

impl<P: Send + Sync + 'static> TaskContext<P> {
    pub fn new(
        store: Arc<dyn RecordStore<P>>,
        servers: Arc<dyn ServerRegistry>,
        files: Arc<dyn LocalFiles>,
    ) -> Self {
        Self {
            store,
            servers,
            files,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore<P>> {
        &self.store
    }

    /// Load record `id` and the server it runs on.
    pub async fn prepare(
        &self,
        id: DbId,
    ) -> Result<(TaskRecord<P>, Arc<dyn ServerFunctions>), TaskError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(TaskError::RecordNotFound(id))?;
        let server = self
            .servers
            .resolve(&record.server_name, &record.server_version)
            .ok_or_else(|| TaskError::ServerNotFound {
                name: record.server_name.clone(),
                version: record.server_version.clone(),
            })?;
        Ok((record, server))
    }

    pub async fn restore(&self) -> Result<Vec<(DbId, Resume)>, TaskError> {
        Ok(self
            .store
            .list_unfinished()
            .await?
            .into_iter()
            .filter_map(|r| Resume::for_record(&r).map(|resume| (r.id, resume)))
            .collect())
    }

    /// Mark `record` wait unless a previous run already left it running.
    pub async fn mark_wait(&self, record: &TaskRecord<P>) -> Result<(), TaskError> {
        if record.status != TaskStatus::Running {
            self.store
                .update(record.id, TaskPatch::status(TaskStatus::Wait))
                .await?;
        }
        Ok(())
    }

    /// Mark `record` running and call its server.
    ///
    /// The job id is stored only once the server accepts the call, so a
    /// `Retry` leaves nothing to query.
    pub async fn call(
        &self,
        record: &TaskRecord<P>,
        server: &dyn ServerFunctions,
        request: FunctionRequest,
    ) -> Result<RunState, TaskError> {
        if record.status != TaskStatus::Running || record.start_time.is_none() {
            let mut running = TaskPatch::status(TaskStatus::Running);
            if record.start_time.is_none() {
                running = running.with_start_time(Utc::now());
            }
            self.store.update(record.id, running).await?;
        }

        let call_id = request.id.clone();

        let outcome = server.call(request).await?;
        tracing::debug!(biz_id = record.id, call_id = %call_id, outcome = ?outcome, "Server call returned");
        match outcome {
            FunctionOutcome::Success { .. } => {
                let job_result = serde_json::to_value(&outcome)?;
                self.store
                    .update(
                        record.id,
                        TaskPatch::status(TaskStatus::Success)
                            .with_job_id(call_id)
                            .with_job_result(job_result),
                    )
                    .await?;
                Ok(RunState::Success)
            }
            FunctionOutcome::Querying => {
                self.store
                    .update(record.id, TaskPatch::default().with_job_id(call_id))
                    .await?;
                Ok(RunState::Querying)
            }
            FunctionOutcome::Retry => Ok(RunState::Retry),
        }
    }

    /// Ask the server about the last call of record `id`, `call_id` when
    /// the record has none stored.
    pub async fn query(&self, id: DbId, call_id: &str) -> Result<QueryState, TaskError> {
        let (record, server) = self.prepare(id).await?;
        let job_id = record.job_id.as_deref().unwrap_or(call_id);
        match server.query(job_id).await? {
            outcome @ QueryOutcome::Success { .. } => {
                let job_result = serde_json::to_value(&outcome)?;
                self.store
                    .update(
                        id,
                        TaskPatch::status(TaskStatus::Success).with_job_result(job_result),
                    )
                    .await?;
                Ok(QueryState::Success)
            }
            QueryOutcome::Running => Ok(QueryState::Running),
            QueryOutcome::Unknown => Ok(QueryState::Lost),
        }
    }

    /// Copy the produced artifact into `folder` of the data directory and
    /// close the record as `success`.
    pub async fn persist_output(&self, id: DbId, folder: &str) -> Result<(), TaskError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(TaskError::RecordNotFound(id))?;
        let produced = record.job_result["data"]["url"]
            .as_str()
            .filter(|url| !url.is_empty())
            .ok_or(TaskError::MissingOutput)?;
        let output = self.files.persist(Path::new(produced), folder).await?;
        tracing::info!(biz_id = id, output = %output.display(), "Task output persisted");

        self.store
            .update(
                id,
                TaskPatch::status(TaskStatus::Success)
                    .with_end_time(Utc::now())
                    .with_output(output.display().to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn fail(&self, id: DbId, msg: &str) -> Result<(), TaskError> {
        self.store
            .update(
                id,
                TaskPatch::status(TaskStatus::Fail)
                    .with_status_msg(msg)
                    .with_end_time(Utc::now()),
            )
            .await?;
        Ok(())
    }

    pub async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), TaskError> {
        self.store.update(id, patch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: TaskStatus, job_id: Option<&str>) -> TaskRecord<()> {
        let mut record = TaskRecord::new(1, "s", "1", ());
        record.status = status;
        record.job_id = job_id.map(str::to_string);
        record
    }

    #[test]
    fn wait_runs_and_accepted_jobs_query() {
        let resume = |status, job_id| Resume::for_record(&record(status, job_id));
        assert_eq!(resume(TaskStatus::Wait, None), Some(Resume::Run));
        assert_eq!(resume(TaskStatus::Running, Some("T_1")), Some(Resume::Query));
        assert_eq!(resume(TaskStatus::Querying, Some("T_1")), Some(Resume::Query));
        assert_eq!(resume(TaskStatus::Success, Some("T_1")), None);
        assert_eq!(resume(TaskStatus::Fail, None), None);
    }

    #[test]
    fn running_without_accepted_job_runs_again() {
        assert_eq!(
            Resume::for_record(&record(TaskStatus::Running, None)),
            Some(Resume::Run)
        );
    }
}
