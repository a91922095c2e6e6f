//! Startup seed of the in-memory task stores.

use std::collections::HashMap;
use std::path::Path;

use aigc_core::types::DbId;
use aigc_tasks::{SoundTtsParam, TaskRecord, VideoGenParam};
use serde::Deserialize;

/// Contents of `AIGC_TASKS_FILE`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksFile {
    #[serde(default)]
    pub sound_tts: Vec<TaskRecord<SoundTtsParam>>,
    #[serde(default)]
    pub video_gen: Vec<TaskRecord<VideoGenParam>>,
    /// Template id to video file.
    #[serde(default)]
    pub video_templates: HashMap<DbId, String>,
    /// Voice-clone record id to produced sound file.
    #[serde(default)]
    pub sound_clone_outputs: HashMap<DbId, String>,
}

impl TasksFile {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let file: Self = serde_json::from_slice(&raw)?;
        tracing::info!(
            path = %path.display(),
            sound_tts = file.sound_tts.len(),
            video_gen = file.video_gen.len(),
            "Loaded task seed file",
        );
        Ok(file)
    }
}
