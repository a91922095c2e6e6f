//! Business task lifecycle on top of the remote orchestrator.
//!
//! Every task type implements [`TaskBiz`](biz::TaskBiz) over a shared
//! [`TaskContext`](biz::TaskContext); a [`TaskDriver`](driver::TaskDriver)
//! moves records from `wait` to `success` or `fail` and resumes unfinished
//! records after a restart.

pub mod biz;
pub mod driver;
pub mod error;
pub mod record;
pub mod sound_tts;
pub mod store;
pub mod video_gen;

pub use biz::{QueryState, Resume, RunState, TaskBiz, TaskContext};
pub use driver::{DriveOutcome, TaskDriver};
pub use error::TaskError;
pub use record::{TaskPatch, TaskRecord, TaskStatus};
pub use sound_tts::{SoundTtsParam, SoundTtsTask};
pub use store::{MemoryRecordStore, RecordStore, ServerRegistry, StaticServerRegistry};
pub use video_gen::{MediaAssets, SoundSource, StaticMediaAssets, VideoGenParam, VideoGenTask};
