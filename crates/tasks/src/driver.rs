//! Drives task records through their lifecycle.
//!
//! A [`TaskDriver`] owns one [`TaskBiz`] and moves each record it is given
//! from `run` to a terminal status: a `Retry` re-runs the record after the
//! retry interval, a `Querying` switches to polling `query` on the query
//! interval, and any error fails the record with the error text. Loops
//! stop early when the driver's cancellation token fires, leaving the
//! record unfinished so a later [`restore`](TaskDriver::restore) picks it
//! up again. An error seen after cancellation is treated the same way.

use std::sync::Arc;
use std::time::Duration;

use aigc_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::biz::{QueryState, Resume, RunState, TaskBiz};
use crate::error::TaskError;
use crate::record::{TaskPatch, TaskStatus};

/// Default delay before re-running a record the server asked to retry.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay between two queries of a `querying` record.
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Final state reached by [`TaskDriver::drive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    Succeeded,
    Failed(String),
    /// Stopped by shutdown before reaching a terminal status.
    Interrupted,
}

pub struct TaskDriver {
    biz: Arc<dyn TaskBiz>,
    retry_interval: Duration,
    query_interval: Duration,
    cancel: CancellationToken,
}

impl TaskDriver {
    pub fn new(biz: Arc<dyn TaskBiz>, cancel: CancellationToken) -> Self {
        Self {
            biz,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            query_interval: DEFAULT_QUERY_INTERVAL,
            cancel,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }

    pub fn biz(&self) -> &Arc<dyn TaskBiz> {
        &self.biz
    }

    /// Resume every unfinished record on its own task.
    pub async fn restore(
        self: &Arc<Self>,
    ) -> Result<Vec<tokio::task::JoinHandle<DriveOutcome>>, TaskError> {
        let pending = self.biz.restore().await?;
        tracing::info!(biz = self.biz.name(), count = pending.len(), "Restoring unfinished tasks");
        Ok(pending
            .into_iter()
            .map(|(id, resume)| self.spawn(id, resume))
            .collect())
    }

    pub fn spawn(self: &Arc<Self>, id: DbId, resume: Resume) -> tokio::task::JoinHandle<DriveOutcome> {
        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.drive(id, resume).await })
    }

    /// Drive record `id` until it succeeds, fails, or the driver is
    /// cancelled.
    pub async fn drive(&self, id: DbId, resume: Resume) -> DriveOutcome {
        let biz = self.biz.name();
        tracing::info!(biz, biz_id = id, resume = ?resume, "Driving task");
        let mut next = resume;

        loop {
            if self.cancel.is_cancelled() {
                return DriveOutcome::Interrupted;
            }
            match next {
                Resume::Run => match self.biz.run(id).await {
                    Ok(RunState::Success) => return self.succeed(id).await,
                    Ok(RunState::Querying) => {
                        if let Err(e) = self
                            .biz
                            .update(id, TaskPatch::status(TaskStatus::Querying))
                            .await
                        {
                            return self.fail(id, e.to_string()).await;
                        }
                        if !self.pause(self.query_interval).await {
                            return DriveOutcome::Interrupted;
                        }
                        next = Resume::Query;
                    }
                    Ok(RunState::Retry) => {
                        tracing::debug!(biz, biz_id = id, "Server busy, retrying later");
                        if !self.pause(self.retry_interval).await {
                            return DriveOutcome::Interrupted;
                        }
                    }
                    Err(e) => return self.fail_unless_cancelled(id, e).await,
                },
                Resume::Query => match self.biz.query(id).await {
                    Ok(QueryState::Success) => return self.succeed(id).await,
                    Ok(QueryState::Running) => {
                        if !self.pause(self.query_interval).await {
                            return DriveOutcome::Interrupted;
                        }
                    }
                    Ok(QueryState::Lost) => {
                        return self.fail(id, "Task not found on server".to_string()).await
                    }
                    Err(e) => return self.fail_unless_cancelled(id, e).await,
                },
            }
        }
    }

    // ---- private helpers ----

    async fn succeed(&self, id: DbId) -> DriveOutcome {
        match self.biz.on_success(id).await {
            Ok(()) => {
                tracing::info!(biz = self.biz.name(), biz_id = id, "Task succeeded");
                DriveOutcome::Succeeded
            }
            Err(e) => self.fail(id, e.to_string()).await,
        }
    }

    /// Shutdown aborts in-flight calls; their errors leave the record for
    /// the next restore.
    async fn fail_unless_cancelled(&self, id: DbId, err: TaskError) -> DriveOutcome {
        if self.cancel.is_cancelled() {
            tracing::info!(biz = self.biz.name(), biz_id = id, error = %err, "Task interrupted by shutdown");
            return DriveOutcome::Interrupted;
        }
        self.fail(id, err.to_string()).await
    }

    async fn fail(&self, id: DbId, msg: String) -> DriveOutcome {
        tracing::warn!(biz = self.biz.name(), biz_id = id, error = %msg, "Task failed");
        if let Err(e) = self.biz.on_fail(id, &msg).await {
            tracing::error!(biz = self.biz.name(), biz_id = id, error = %e, "Failed to record task failure");
        }
        DriveOutcome::Failed(msg)
    }

    /// Sleep for `interval`. Returns `false` if cancelled first.
    async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(interval) => true,
        }
    }
}
