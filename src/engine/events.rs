use crate::protocol::WorkerKind;
use crate::shared::WorkerFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    JobState,
    StepProgress,
}

/// One progress notification from the engine. Subscribers receive owned
/// copies; the engine never waits on a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EngineEventKind,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerKind>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<i64>,
}

const EVENT_BUFFER: usize = 1_024;

/// Bounded multi-subscriber broadcast. A full subscriber buffer drops that
/// subscriber's copy of the event instead of blocking the scheduler.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<SyncSender<EngineEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = std::sync::mpsc::sync_channel(EVENT_BUFFER);
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
