//! Shared building blocks for the AIGC job orchestration workspace.
//!
//! - [`types`]: id and timestamp aliases used across crates.
//! - [`error`]: the [`CoreError`](error::CoreError) enum returned by
//!   collaborator interfaces (record stores, registries).
//! - [`launcher`]: the merge-only [`LauncherResult`](launcher::LauncherResult)
//!   accumulated from a job's streamed logs.
//! - [`logs`]: result extraction and error detection over free-text logs.
//! - [`files`]: the local filesystem collaborator.

pub mod error;
pub mod files;
pub mod launcher;
pub mod logs;
pub mod types;
