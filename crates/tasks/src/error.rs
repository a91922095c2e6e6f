use aigc_core::error::CoreError;
use aigc_core::types::DbId;
use aigc_remote::ServerError;

/// Why a task step failed. The message becomes the record's `status_msg`.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("record not found")]
    RecordNotFound(DbId),

    #[error("server not found")]
    ServerNotFound { name: String, version: String },

    /// The template a video is generated from has no video file.
    #[error("VideoTemplateEmpty")]
    VideoTemplateEmpty,

    /// No sound file could be resolved for a video.
    #[error("SoundFileEmpty")]
    SoundFileEmpty,

    /// A successful job left no artifact to persist.
    #[error("Task result has no output file")]
    MissingOutput,

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Store(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode job result: {0}")]
    Encode(#[from] serde_json::Error),
}
