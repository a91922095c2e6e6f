//! Remote job orchestration over the AIGC server HTTP protocol.
//!
//! Provides the protocol client ([`api`]), file staging between local
//! paths and server references ([`staging`]), the submit-and-poll loop
//! ([`poller`]) with its per-invocation settlement ([`watch`]), and the
//! single-flight [`RemoteServer`](server::RemoteServer) orchestrator that
//! exposes one operation per model function ([`function`]).

pub mod api;
pub mod config;
pub mod function;
pub mod poller;
pub mod server;
pub mod staging;
pub mod watch;

pub use api::{JobApi, RemoteApi, RemoteApiError};
pub use config::{ConfigError, RemoteConfig};
pub use function::{FunctionOutcome, FunctionRequest, ModelTask, QueryOutcome};
pub use poller::{JobError, JobPoller, PollerConfig};
pub use server::{
    RemoteServer, ServerConnection, ServerError, ServerFunctions, ServerInfo, ServerOptions,
};
pub use staging::{FileStaging, StagingError};
