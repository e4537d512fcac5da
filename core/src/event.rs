use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Progress event observed by the command surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event key (e.g., "build.started", "session.stopping")
    pub key: EventKey,

    /// Human-readable message
    pub message: String,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProgressEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Events with no subscriber are dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit a keyed message
    pub fn message(&self, key: &str, message: impl Into<String>) {
        self.emit(ProgressEvent::new(key, message));
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event catalog - predefined event keys
pub mod events {
    // Build events
    pub const BUILD_STARTED: &str = "build.started";
    pub const BUILD_EMULATION: &str = "build.emulation";
    pub const BUILD_SUBMITTED: &str = "build.submitted";
    pub const BUILD_COMPLETED: &str = "build.completed";

    // Deploy events
    pub const DEPLOY_SAVING: &str = "deploy.saving";
    pub const DEPLOY_SENDING: &str = "deploy.sending";
    pub const DEPLOY_SAVED: &str = "deploy.saved";

    // Session events
    pub const SESSION_STOPPING: &str = "session.stopping";
    pub const SESSION_REMOVING: &str = "session.removing";
    pub const SESSION_IMAGE_SWAP: &str = "session.image_swap";
    pub const SESSION_CREATING: &str = "session.creating";
    pub const SESSION_STARTING: &str = "session.starting";
    pub const SESSION_ATTACHING: &str = "session.attaching";
    pub const SESSION_DONE: &str = "session.done";
    pub const SESSION_FAILED: &str = "session.failed";
}
