//! Lifecycle notifications for the presentation layer.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ServerEvent`]: the envelope sent for every server and task
//!   lifecycle change.

pub mod bus;

pub use bus::{EventBus, ServerEvent, ServerEventKind};
