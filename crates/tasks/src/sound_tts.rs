//! Text-to-speech task.

use aigc_core::error::CoreError;
use aigc_core::types::DbId;
use aigc_remote::{FunctionRequest, ModelTask};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::biz::{QueryState, Resume, RunState, TaskBiz, TaskContext};
use crate::error::TaskError;
use crate::record::TaskPatch;

/// Parameters of a TTS record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundTtsParam {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    /// Extra model parameters passed through untouched.
    #[serde(default)]
    pub param: serde_json::Map<String, serde_json::Value>,
}

impl SoundTtsParam {
    /// Model parameters sent with the call: `param` plus the voice
    /// settings that are set.
    pub fn model_param(&self) -> serde_json::Value {
        let mut param = self.param.clone();
        if let Some(speaker) = &self.speaker {
            param.insert("speaker".into(), speaker.clone().into());
        }
        if let Some(speed) = self.speed {
            param.insert("speed".into(), speed.into());
        }
        if let Some(seed) = self.seed {
            param.insert("seed".into(), seed.into());
        }
        serde_json::Value::Object(param)
    }
}

pub struct SoundTtsTask {
    ctx: TaskContext<SoundTtsParam>,
}

impl SoundTtsTask {
    pub const NAME: &'static str = "SoundTts";

    pub fn new(ctx: TaskContext<SoundTtsParam>) -> Self {
        Self { ctx }
    }

    pub fn call_id(id: DbId) -> String {
        format!("{}_{id}", Self::NAME)
    }
}

#[async_trait]
impl TaskBiz for SoundTtsTask {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn restore(&self) -> Result<Vec<(DbId, Resume)>, TaskError> {
        self.ctx.restore().await
    }

    async fn run(&self, id: DbId) -> Result<RunState, TaskError> {
        let (record, server) = self.ctx.prepare(id).await?;
        self.ctx.mark_wait(&record).await?;

        if record.param.text.trim().is_empty() {
            return Err(CoreError::Validation("text is empty".into()).into());
        }

        let request = FunctionRequest::new(
            Self::call_id(id),
            ModelTask::SoundTts {
                text: record.param.text.clone(),
            },
        )
        .with_param(record.param.model_param());
        self.ctx.call(&record, server.as_ref(), request).await
    }

    async fn query(&self, id: DbId) -> Result<QueryState, TaskError> {
        self.ctx.query(id, &Self::call_id(id)).await
    }

    async fn on_success(&self, id: DbId) -> Result<(), TaskError> {
        self.ctx.persist_output(id, "soundTts").await
    }

    async fn on_fail(&self, id: DbId, msg: &str) -> Result<(), TaskError> {
        self.ctx.fail(id, msg).await
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), TaskError> {
        self.ctx.update(id, patch).await
    }
}
