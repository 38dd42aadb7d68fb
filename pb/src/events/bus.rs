//! Event bus - central pub/sub for pipeline progress
//!
//! Built on a tokio broadcast channel: emitting never blocks the publisher,
//! slow subscribers lag and drop instead of back-pressuring the runner.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{EventFilter, EventKind, TaskEvent};

/// Channel capacity; streaming chunks arrive batched, so a few thousand
/// events cover the burstiest runs
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8_192;

/// Central event bus shared by the task service, runners, and subscribers
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(EventBus::new(DEFAULT_CHANNEL_CAPACITY))
    }

    /// Emit an event to all subscribers; fire-and-forget
    pub fn emit(&self, event: TaskEvent) {
        debug!(kind = event.kind.as_str(), task_id = event.task_id, "emit");
        let _ = self.tx.send(event);
    }

    /// Raw subscription receiving every event
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Spawn a background subscriber that invokes `handler` for each event
    /// matching `filter`; returns the task handle for shutdown joins
    pub fn spawn_subscriber<F>(&self, filter: EventFilter, mut handler: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(TaskEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if filter.matches(&event) {
                            handler(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Handle bound to one task for convenient emission
    pub fn emitter_for(&self, task_id: i64, user_id: i64, problem_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            task_id,
            user_id,
            problem_id: problem_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Cheaply clonable emission handle carrying the task identity
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<TaskEvent>,
    task_id: i64,
    user_id: i64,
    problem_id: String,
}

impl EventEmitter {
    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn emit(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    fn base(&self, kind: EventKind) -> TaskEvent {
        TaskEvent::new(kind, self.task_id, self.user_id).with_problem(self.problem_id.clone())
    }

    pub fn started(&self) {
        self.emit(self.base(EventKind::TaskStarted));
    }

    pub fn progress(&self, stage: &str, progress: u8, message: &str, logs: Vec<String>) {
        let mut event = self
            .base(EventKind::TaskProgress)
            .with_stage(stage, progress)
            .with_message(message);
        event.logs = logs;
        self.emit(event);
    }

    pub fn completed(&self, uploaded_url: Option<&str>) {
        let mut event = self.base(EventKind::TaskCompleted).with_stage("completed", 100);
        if let Some(url) = uploaded_url {
            event.extra = serde_json::json!({ "uploaded_url": url });
        }
        self.emit(event);
    }

    pub fn failed(&self, stage: &str, error: &str) {
        let event = self
            .base(EventKind::TaskFailed)
            .with_stage(stage, 0)
            .with_message(error);
        self.emit(event);
    }

    pub fn cancelled(&self) {
        let event = self.base(EventKind::TaskCancelled).with_stage("cancelled", 0);
        self.emit(event);
    }
}
