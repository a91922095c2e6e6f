//! Persisted state of one business task.

use aigc_core::launcher::merge_fields;
use aigc_core::types::{DbId, JsonMap, Timestamp};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Wait,
    Running,
    Querying,
    Success,
    Fail,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Running => "running",
            Self::Querying => "querying",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    /// `success` and `fail` are final; a terminal record is never driven
    /// again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task record with task-specific parameters `P`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord<P> {
    pub id: DbId,
    pub server_name: String,
    pub server_version: String,
    pub param: P,
    pub status: TaskStatus,
    #[serde(default)]
    pub status_msg: String,
    /// Id of the last call sent to the server.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Raw outcome of the last successful call or query.
    #[serde(default)]
    pub job_result: serde_json::Value,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    /// Fields accumulated across runs. Only ever merged.
    #[serde(default)]
    pub result: JsonMap,
    /// Produced artifact, persisted in the data directory.
    #[serde(default)]
    pub output: Option<String>,
}

impl<P> TaskRecord<P> {
    /// A fresh record in `wait`.
    pub fn new(
        id: DbId,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        param: P,
    ) -> Self {
        Self {
            id,
            server_name: server_name.into(),
            server_version: server_version.into(),
            param,
            status: TaskStatus::Wait,
            status_msg: String::new(),
            job_id: None,
            job_result: serde_json::Value::Null,
            start_time: None,
            end_time: None,
            result: JsonMap::new(),
            output: None,
        }
    }
}

/// Partial update of a [`TaskRecord`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub status_msg: Option<String>,
    pub job_id: Option<String>,
    pub job_result: Option<serde_json::Value>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// Merged into the stored map, never replacing it.
    pub result: Option<JsonMap>,
    pub output: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_status_msg(mut self, msg: impl Into<String>) -> Self {
        self.status_msg = Some(msg.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_job_result(mut self, job_result: serde_json::Value) -> Self {
        self.job_result = Some(job_result);
        self
    }

    pub fn with_start_time(mut self, at: Timestamp) -> Self {
        self.start_time = Some(at);
        self
    }

    pub fn with_end_time(mut self, at: Timestamp) -> Self {
        self.end_time = Some(at);
        self
    }

    pub fn with_result(mut self, result: JsonMap) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Apply the patch to `record`.
    pub fn apply<P>(self, record: &mut TaskRecord<P>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(msg) = self.status_msg {
            record.status_msg = msg;
        }
        if let Some(job_id) = self.job_id {
            record.job_id = Some(job_id);
        }
        if let Some(job_result) = self.job_result {
            record.job_result = job_result;
        }
        if let Some(at) = self.start_time {
            record.start_time = Some(at);
        }
        if let Some(at) = self.end_time {
            record.end_time = Some(at);
        }
        if let Some(result) = self.result {
            merge_fields(&mut record.result, result);
        }
        if let Some(output) = self.output {
            record.output = Some(output);
        }
    }
}
