use crate::protocol::{EventEnvelope, WorkerKind};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

pub const WORKER_AVAILABLE: &str = "WORKER_AVAILABLE";

/// Lifecycle and wire events observable from outside the supervisor.
#[derive(Debug, Clone)]
pub enum WorkerSignal {
    Available {
        worker: WorkerKind,
    },
    Exited {
        worker: WorkerKind,
        reason: String,
    },
    Unhealthy {
        worker: WorkerKind,
        reason: String,
    },
    /// A fan-out event emitted by a worker on its stdout.
    Event {
        worker: WorkerKind,
        event: EventEnvelope,
    },
}

impl WorkerSignal {
    /// Wire-level status code surfaced to front-end subscribers. Worker
    /// events keep their own code when they carry one.
    pub fn code(&self) -> &str {
        match self {
            Self::Available { .. } => WORKER_AVAILABLE,
            Self::Exited { .. } => "WORKER_EXITED",
            Self::Unhealthy { .. } => "WORKER_UNHEALTHY",
            Self::Event { event, .. } => event.code.as_deref().unwrap_or("WORKER_EVENT"),
        }
    }
}

const SIGNAL_BUFFER: usize = 256;

/// Bounded multi-subscriber fan-out. A subscriber that stops draining loses
/// signals rather than blocking the supervisor.
#[derive(Debug, Default)]
pub struct SignalHub {
    subscribers: Mutex<Vec<SyncSender<WorkerSignal>>>,
}

impl SignalHub {
    pub fn subscribe(&self) -> Receiver<WorkerSignal> {
        let (tx, rx) = std::sync::mpsc::sync_channel(SIGNAL_BUFFER);
        self.subscribers
            .lock()
            .expect("signal hub lock poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, signal: WorkerSignal) {
        let mut subscribers = self.subscribers.lock().expect("signal hub lock poisoned");
        subscribers.retain(|tx| match tx.try_send(signal.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
