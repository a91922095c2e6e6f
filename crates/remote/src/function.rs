//! Request and outcome types of orchestrator operations.

use aigc_core::types::Timestamp;
use serde::{Deserialize, Serialize};

/// The model function to run and its own inputs.
///
/// Serialises as the job's `modelConfig` body with a camelCase `type` tag,
/// e.g. `{"type": "soundTts", "text": "hello"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ModelTask {
    SoundTts {
        text: String,
    },
    SoundClone {
        text: String,
        prompt_audio: String,
        prompt_text: String,
    },
    VideoGen {
        video: String,
        audio: String,
    },
    Asr {
        audio: String,
    },
    TextToImage {
        prompt: String,
    },
    ImageToImage {
        image: String,
        prompt: String,
    },
}

/// Field of the merged launcher result a function's output lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultField {
    /// A server reference to produced media, downloaded on success.
    Url,
    /// Transcription records, returned as-is.
    Records,
}

impl ResultField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Records => "records",
        }
    }
}

impl ModelTask {
    /// Wire name of the function (the `type` tag).
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::SoundTts { .. } => "soundTts",
            Self::SoundClone { .. } => "soundClone",
            Self::VideoGen { .. } => "videoGen",
            Self::Asr { .. } => "asr",
            Self::TextToImage { .. } => "textToImage",
            Self::ImageToImage { .. } => "imageToImage",
        }
    }

    /// Inputs that may point at local files and must be staged.
    pub fn media_inputs_mut(&mut self) -> Vec<&mut String> {
        match self {
            Self::SoundClone { prompt_audio, .. } => vec![prompt_audio],
            Self::VideoGen { video, audio } => vec![video, audio],
            Self::Asr { audio } => vec![audio],
            Self::ImageToImage { image, .. } => vec![image],
            Self::SoundTts { .. } | Self::TextToImage { .. } => Vec::new(),
        }
    }

    pub fn result_field(&self) -> ResultField {
        match self {
            Self::Asr { .. } => ResultField::Records,
            _ => ResultField::Url,
        }
    }
}

/// Input of one orchestrator call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRequest {
    /// Caller-chosen id, e.g. `VideoGen_12`.
    pub id: String,
    /// Free-form model parameters merged into `modelConfig`.
    pub param: serde_json::Value,
    pub task: ModelTask,
}

impl FunctionRequest {
    pub fn new(id: impl Into<String>, task: ModelTask) -> Self {
        Self {
            id: id.into(),
            param: serde_json::Value::Object(Default::default()),
            task,
        }
    }

    pub fn with_param(mut self, param: serde_json::Value) -> Self {
        self.param = param;
        self
    }
}

/// Result of an orchestrator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FunctionOutcome {
    /// The job completed within the call.
    Success {
        start: Timestamp,
        end: Timestamp,
        data: serde_json::Value,
    },
    /// The job keeps running; poll with `query`.
    Querying,
    /// Another job is in flight; try again later.
    Retry,
}

/// Result of an orchestrator query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryOutcome {
    Success { data: serde_json::Value },
    Running,
    /// The server has no record of the job.
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_task_serialises_with_camel_case_tag_and_fields() {
        let task = ModelTask::SoundClone {
            text: "hi".into(),
            prompt_audio: "/a.wav".into(),
            prompt_text: "ref".into(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "soundClone");
        assert_eq!(json["promptAudio"], "/a.wav");
        assert_eq!(json["promptText"], "ref");
        assert_eq!(task.function_name(), "soundClone");
    }

    #[test]
    fn media_inputs_cover_file_fields_only() {
        let mut task = ModelTask::VideoGen {
            video: "/v.mp4".into(),
            audio: "/a.wav".into(),
        };
        for input in task.media_inputs_mut() {
            *input = format!("remote:{input}");
        }
        assert_eq!(
            task,
            ModelTask::VideoGen {
                video: "remote:/v.mp4".into(),
                audio: "remote:/a.wav".into(),
            }
        );
        assert!(ModelTask::SoundTts { text: "x".into() }
            .media_inputs_mut()
            .is_empty());
    }

    #[test]
    fn asr_reads_records_others_read_url() {
        assert_eq!(
            ModelTask::Asr { audio: "a".into() }.result_field(),
            ResultField::Records
        );
        assert_eq!(
            ModelTask::TextToImage { prompt: "p".into() }
                .result_field()
                .key(),
            "url"
        );
    }

    #[test]
    fn outcome_is_tagged() {
        let json = serde_json::to_value(FunctionOutcome::Retry).unwrap();
        assert_eq!(json["type"], "retry");
        let json = serde_json::to_value(QueryOutcome::Unknown).unwrap();
        assert_eq!(json["type"], "unknown");
    }
}
