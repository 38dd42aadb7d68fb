//! Event types for task progress streaming
//!
//! Every observable step of a pipeline run is described by a [`TaskEvent`]:
//! lifecycle transitions, batched log lines, adapter health changes, and
//! system-level notices. Subscribers (the WebSocket broadcaster, tests)
//! filter by [`EventKind`] or by class.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The event vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.progress")]
    TaskProgress,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "task.cancelled")]
    TaskCancelled,
    #[serde(rename = "adapter.initialized")]
    AdapterInitialized,
    #[serde(rename = "adapter.degraded")]
    AdapterDegraded,
    #[serde(rename = "adapter.shutdown")]
    AdapterShutdown,
    #[serde(rename = "system.startup")]
    SystemStartup,
    #[serde(rename = "system.shutdown")]
    SystemShutdown,
    #[serde(rename = "system.error")]
    SystemError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskStarted => "task.started",
            EventKind::TaskProgress => "task.progress",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskFailed => "task.failed",
            EventKind::TaskCancelled => "task.cancelled",
            EventKind::AdapterInitialized => "adapter.initialized",
            EventKind::AdapterDegraded => "adapter.degraded",
            EventKind::AdapterShutdown => "adapter.shutdown",
            EventKind::SystemStartup => "system.startup",
            EventKind::SystemShutdown => "system.shutdown",
            EventKind::SystemError => "system.error",
        }
    }

    /// The dotted prefix: `task`, `adapter`, or `system`
    pub fn class(self) -> &'static str {
        match self {
            EventKind::TaskStarted
            | EventKind::TaskProgress
            | EventKind::TaskCompleted
            | EventKind::TaskFailed
            | EventKind::TaskCancelled => "task",
            EventKind::AdapterInitialized | EventKind::AdapterDegraded | EventKind::AdapterShutdown => "adapter",
            EventKind::SystemStartup | EventKind::SystemShutdown | EventKind::SystemError => "system",
        }
    }
}

/// Subscription filter: one kind, a whole class, or everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Kind(EventKind),
    /// Matches `<class>.*`, e.g. `Class("adapter")`
    Class(&'static str),
    All,
}

impl EventFilter {
    pub fn matches(self, event: &TaskEvent) -> bool {
        match self {
            EventFilter::Kind(kind) => event.kind == kind,
            EventFilter::Class(class) => event.kind.class() == class,
            EventFilter::All => true,
        }
    }
}

/// One progress record, immutable once emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub task_id: i64,
    /// Owning user; lets the broadcast layer route per-user
    pub user_id: i64,
    #[serde(default)]
    pub problem_id: String,
    #[serde(default)]
    pub stage: String,
    /// 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    /// Batched log lines, present on `task.progress`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl TaskEvent {
    pub fn new(kind: EventKind, task_id: i64, user_id: i64) -> Self {
        TaskEvent {
            kind,
            task_id,
            user_id,
            problem_id: String::new(),
            stage: String::new(),
            progress: 0,
            message: String::new(),
            logs: Vec::new(),
            timestamp: Utc::now(),
            extra: serde_json::Value::Null,
        }
    }

    pub fn with_problem(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = problem_id.into();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>, progress: u8) -> Self {
        self.stage = stage.into();
        self.progress = progress;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
