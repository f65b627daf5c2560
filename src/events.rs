//! Store notifications.
//!
//! Delivery is fire-and-forget over a `tokio::sync::broadcast` channel: the
//! store never waits on listeners and sending with no listeners is fine.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_CAPACITY: usize = 64;

/// Best-effort sub-steps whose failure does not abort an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Substep {
    SaveImage,
    SaveAudio,
    FallbackImage,
    RemoveAttachment,
    LoadIndex,
}

impl std::fmt::Display for Substep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Substep::SaveImage => write!(f, "save_image"),
            Substep::SaveAudio => write!(f, "save_audio"),
            Substep::FallbackImage => write!(f, "fallback_image"),
            Substep::RemoveAttachment => write!(f, "remove_attachment"),
            Substep::LoadIndex => write!(f, "load_index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A memory was created and persisted; listeners should refresh
    MemoryCreated { id: String },
    /// A best-effort sub-step failed and the operation carried on
    SubstepFailed { step: Substep, detail: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn memory_created(&self, id: &str) {
        let _ = self.tx.send(StoreEvent::MemoryCreated { id: id.to_string() });
    }

    /// Log a non-fatal failure and publish it
    pub fn substep_failed(&self, step: Substep, detail: impl std::fmt::Display) {
        let detail = detail.to_string();
        warn!(step = %step, error = %detail, "memory store sub-step failed; continuing");
        let _ = self.tx.send(StoreEvent::SubstepFailed { step, detail });
    }
}
