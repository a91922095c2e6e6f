//! Lip-synced video generation from a video template and a sound file.
//!
//! The sound comes from a finished TTS record, a finished voice-clone
//! record, or a custom file picked by the user. Both dependencies are
//! resolved when the task runs, not when it is created.

use std::collections::HashMap;
use std::sync::Arc;

use aigc_core::error::CoreError;
use aigc_core::types::DbId;
use aigc_remote::{FunctionRequest, ModelTask};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::biz::{QueryState, Resume, RunState, TaskBiz, TaskContext};
use crate::error::TaskError;
use crate::record::TaskPatch;
use crate::sound_tts::SoundTtsParam;
use crate::store::RecordStore;

/// Where the sound of a video comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "soundType", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SoundSource {
    SoundTts { sound_tts_id: DbId },
    SoundClone { sound_clone_id: DbId },
    SoundCustom { sound_custom_file: String },
}

/// Parameters of a video generation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenParam {
    pub video_template_id: DbId,
    #[serde(flatten)]
    pub sound: SoundSource,
    /// Extra model parameters passed through untouched.
    #[serde(default)]
    pub param: serde_json::Map<String, serde_json::Value>,
}

/// Lookup of the media a video depends on.
#[async_trait]
pub trait MediaAssets: Send + Sync {
    /// Video file of template `id`, `None` if the template does not exist.
    async fn video_template(&self, id: DbId) -> Result<Option<String>, CoreError>;

    /// Produced sound of TTS record `id`.
    async fn sound_tts_output(&self, id: DbId) -> Result<Option<String>, CoreError>;

    /// Produced sound of voice-clone record `id`.
    async fn sound_clone_output(&self, id: DbId) -> Result<Option<String>, CoreError>;
}

/// [`MediaAssets`] reading TTS outputs from their record store and
/// templates and clone outputs from fixed tables.
pub struct StaticMediaAssets {
    templates: HashMap<DbId, String>,
    clone_outputs: HashMap<DbId, String>,
    sound_tts: Arc<dyn RecordStore<SoundTtsParam>>,
}

impl StaticMediaAssets {
    pub fn new(sound_tts: Arc<dyn RecordStore<SoundTtsParam>>) -> Self {
        Self {
            templates: HashMap::new(),
            clone_outputs: HashMap::new(),
            sound_tts,
        }
    }

    pub fn with_template(mut self, id: DbId, video: impl Into<String>) -> Self {
        self.templates.insert(id, video.into());
        self
    }

    pub fn with_clone_output(mut self, id: DbId, sound: impl Into<String>) -> Self {
        self.clone_outputs.insert(id, sound.into());
        self
    }
}

#[async_trait]
impl MediaAssets for StaticMediaAssets {
    async fn video_template(&self, id: DbId) -> Result<Option<String>, CoreError> {
        Ok(self.templates.get(&id).cloned())
    }

    async fn sound_tts_output(&self, id: DbId) -> Result<Option<String>, CoreError> {
        Ok(self.sound_tts.get(id).await?.and_then(|r| r.output))
    }

    async fn sound_clone_output(&self, id: DbId) -> Result<Option<String>, CoreError> {
        Ok(self.clone_outputs.get(&id).cloned())
    }
}

pub struct VideoGenTask {
    ctx: TaskContext<VideoGenParam>,
    assets: Arc<dyn MediaAssets>,
}

impl VideoGenTask {
    pub const NAME: &'static str = "VideoGen";

    pub fn new(ctx: TaskContext<VideoGenParam>, assets: Arc<dyn MediaAssets>) -> Self {
        Self { ctx, assets }
    }

    pub fn call_id(id: DbId) -> String {
        format!("{}_{id}", Self::NAME)
    }

    async fn resolve_sound(&self, sound: &SoundSource) -> Result<String, TaskError> {
        let file = match sound {
            SoundSource::SoundTts { sound_tts_id } => {
                self.assets.sound_tts_output(*sound_tts_id).await?
            }
            SoundSource::SoundClone { sound_clone_id } => {
                self.assets.sound_clone_output(*sound_clone_id).await?
            }
            SoundSource::SoundCustom { sound_custom_file } => Some(sound_custom_file.clone()),
        };
        file.filter(|f| !f.is_empty())
            .ok_or(TaskError::SoundFileEmpty)
    }
}

#[async_trait]
impl TaskBiz for VideoGenTask {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn restore(&self) -> Result<Vec<(DbId, Resume)>, TaskError> {
        self.ctx.restore().await
    }

    async fn run(&self, id: DbId) -> Result<RunState, TaskError> {
        let (record, server) = self.ctx.prepare(id).await?;
        self.ctx.mark_wait(&record).await?;

        let video = self
            .assets
            .video_template(record.param.video_template_id)
            .await?
            .filter(|v| !v.is_empty())
            .ok_or(TaskError::VideoTemplateEmpty)?;
        let audio = self.resolve_sound(&record.param.sound).await?;
        tracing::debug!(biz_id = id, video = %video, audio = %audio, "Video dependencies resolved");

        let request = FunctionRequest::new(Self::call_id(id), ModelTask::VideoGen { video, audio })
            .with_param(serde_json::Value::Object(record.param.param.clone()));
        self.ctx.call(&record, server.as_ref(), request).await
    }

    async fn query(&self, id: DbId) -> Result<QueryState, TaskError> {
        self.ctx.query(id, &Self::call_id(id)).await
    }

    async fn on_success(&self, id: DbId) -> Result<(), TaskError> {
        self.ctx.persist_output(id, "videoGen").await
    }

    async fn on_fail(&self, id: DbId, msg: &str) -> Result<(), TaskError> {
        self.ctx.fail(id, msg).await
    }

    async fn update(&self, id: DbId, patch: TaskPatch) -> Result<(), TaskError> {
        self.ctx.update(id, patch).await
    }
}
