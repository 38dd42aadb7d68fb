//! Log batching between the runner and the event bus
//!
//! Streaming LLM output produces log lines far faster than subscribers want
//! individual events. The batcher aggregates lines per (task, problem) and
//! flushes to the bus when a critical line arrives, the batch reaches 20
//! lines, or 200 ms have passed since the last flush. File writes are
//! buffered separately (50 lines / 1 s). Both buffers are force-flushed on
//! task termination via [`LogBatcher::finish`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use super::bus::EventEmitter;

const EVENT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
const EVENT_FLUSH_MAX: usize = 20;
const FILE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const FILE_FLUSH_MAX: usize = 50;

/// Lines containing any of these markers bypass batching entirely
const CRITICAL_MARKERS: &[&str] = &[
    "==========",
    "✓",
    "✗",
    "[FETCH]",
    "[GEN]",
    "[UPLOAD]",
    "[SOLVE]",
    "retry limit reached",
    "cancelled",
];

/// Per-(task, problem) log aggregator
pub struct LogBatcher {
    emitter: EventEmitter,
    log_path: PathBuf,
    stage: String,
    progress: u8,
    event_buffer: Vec<String>,
    event_last_flush: Instant,
    file_buffer: Vec<String>,
    file_last_flush: Instant,
}

impl LogBatcher {
    pub fn new(emitter: EventEmitter, log_path: PathBuf) -> Self {
        let now = Instant::now();
        LogBatcher {
            emitter,
            log_path,
            stage: "pending".to_string(),
            progress: 0,
            event_buffer: Vec::new(),
            event_last_flush: now,
            file_buffer: Vec::new(),
            file_last_flush: now,
        }
    }

    /// Record the stage the runner is in; attached to every progress event
    pub fn set_stage(&mut self, stage: &str, progress: u8) {
        self.stage = stage.to_string();
        self.progress = progress;
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    fn is_critical(msg: &str) -> bool {
        CRITICAL_MARKERS.iter().any(|m| msg.contains(m))
    }

    /// Append one log line; may flush either buffer
    pub fn append(&mut self, msg: &str) {
        let line = format!("[{}] {}", Utc::now().format("%H:%M:%S"), msg);

        self.file_buffer.push(line.clone());
        if self.file_buffer.len() >= FILE_FLUSH_MAX || self.file_last_flush.elapsed() >= FILE_FLUSH_INTERVAL {
            self.flush_file();
        }

        self.event_buffer.push(line);
        let should_flush = Self::is_critical(msg)
            || self.event_buffer.len() >= EVENT_FLUSH_MAX
            || self.event_last_flush.elapsed() >= EVENT_FLUSH_INTERVAL;
        if should_flush {
            self.flush_events();
        }
    }

    /// Emit the buffered lines as one `task.progress` event
    pub fn flush_events(&mut self) {
        if self.event_buffer.is_empty() {
            self.event_last_flush = Instant::now();
            return;
        }
        let logs = std::mem::take(&mut self.event_buffer);
        let message = logs.last().cloned().unwrap_or_default();
        self.emitter.progress(&self.stage, self.progress, &message, logs);
        self.event_last_flush = Instant::now();
    }

    /// Append the buffered lines to `pipeline.log`; best-effort
    pub fn flush_file(&mut self) {
        if self.file_buffer.is_empty() {
            self.file_last_flush = Instant::now();
            return;
        }
        let lines = std::mem::take(&mut self.file_buffer);
        if let Some(parent) = self.log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .and_then(|mut f| writeln!(f, "{}", lines.join("\n")));
        if let Err(e) = result {
            debug!(path = %self.log_path.display(), error = %e, "pipeline log write failed");
        }
        self.file_last_flush = Instant::now();
    }

    /// Force-flush both buffers; called at task termination
    pub fn finish(&mut self) {
        self.flush_events();
        self.flush_file();
    }
}
