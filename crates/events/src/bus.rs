//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`ServerEvent`]s from orchestrators to whoever
//! renders them. It is designed to be shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Kind of lifecycle change being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerEventKind {
    Starting,
    Running,
    Stopping,
    Stopped,
    /// A function call started on the server. Payload: `{id}`.
    TaskRunning,
    /// New fields were extracted from a job's logs. Payload: `{id, result}`.
    TaskResult,
    Error,
    Success,
}

/// A lifecycle event emitted by one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: ServerEventKind,

    /// Name of the emitting server.
    pub server: String,

    /// Event-specific data.
    pub data: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    /// Create an event with an empty object payload.
    pub fn new(kind: ServerEventKind, server: impl Into<String>) -> Self {
        Self {
            kind,
            server: server.into(),
            data: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use aigc_events::{EventBus, ServerEvent, ServerEventKind};
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
///
/// bus.publish(ServerEvent::new(ServerEventKind::Starting, "cosyvoice"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: ServerEvent) {
        tracing::trace!(kind = ?event.kind, server = %event.server, "Publishing server event");
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
