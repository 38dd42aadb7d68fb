//! Streaming LLM calls wired into the log batcher
//!
//! Every chunk of a streamed completion is forwarded to the per-task log:
//! reasoning on the `[thinking]` channel, answer text on `[code]`. The raw
//! stream is additionally appended to `problem.log` in the workspace.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::LogBatcher;
use crate::llm::{ChatOutcome, ChatRequest, LlmClient, StreamChunk};

use super::PipelineDeps;
use super::types::PipelineError;

/// Waiting for an LLM slot is bounded; a stuck slot counts as an attempt
/// failure upstream
const LLM_SLOT_TIMEOUT: Duration = Duration::from_secs(600);

/// Reassembles streamed fragments into whole prefixed log lines
struct LineBuffer {
    prefix: &'static str,
    pending: String,
}

impl LineBuffer {
    fn new(prefix: &'static str) -> Self {
        LineBuffer {
            prefix,
            pending: String::new(),
        }
    }

    fn push(&mut self, chunk: &str, log: &mut LogBatcher) {
        self.pending.push_str(chunk);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end();
            if !line.is_empty() {
                log.append(&format!("{} {}", self.prefix, line));
            }
        }
    }

    fn flush(&mut self, log: &mut LogBatcher) {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        if !rest.is_empty() {
            log.append(&format!("{} {}", self.prefix, rest));
        }
    }
}

/// Run one streamed completion, forwarding every chunk into the batcher
pub(super) async fn stream_chat(
    deps: &PipelineDeps,
    llm: &dyn LlmClient,
    request: ChatRequest,
    log: &mut LogBatcher,
    raw_log: &Path,
) -> Result<ChatOutcome, PipelineError> {
    let _permit = deps.sems.acquire_llm(LLM_SLOT_TIMEOUT).await?;

    let (tx, mut rx) = mpsc::channel::<StreamChunk>(256);
    let fut = llm.chat_completion(request, Some(tx));
    tokio::pin!(fut);

    let mut thinking = LineBuffer::new("[thinking]");
    let mut answer = LineBuffer::new("[code]");
    let mut raw = String::new();

    let mut handle = |chunk: StreamChunk, log: &mut LogBatcher, raw: &mut String| match chunk {
        StreamChunk::Reasoning(text) => {
            raw.push_str(&text);
            thinking.push(&text, log);
        }
        StreamChunk::Content(text) => {
            raw.push_str(&text);
            answer.push(&text, log);
        }
    };

    let result = loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(chunk) => handle(chunk, log, &mut raw),
                None => break (&mut fut).await,
            },
            result = &mut fut => {
                while let Some(chunk) = rx.recv().await {
                    handle(chunk, log, &mut raw);
                }
                break result;
            }
        }
    };

    thinking.flush(log);
    answer.flush(log);

    if !raw.is_empty()
        && let Err(e) = append_raw(raw_log, &raw)
    {
        debug!(path = %raw_log.display(), error = %e, "raw stream log write failed");
    }

    Ok(result?)
}

/// Non-streaming completion under the same slot discipline
pub(super) async fn blocking_chat(
    deps: &PipelineDeps,
    llm: &dyn LlmClient,
    request: ChatRequest,
) -> Result<ChatOutcome, PipelineError> {
    let _permit = deps.sems.acquire_llm(LLM_SLOT_TIMEOUT).await?;
    Ok(llm.chat_completion(request, None).await?)
}

fn append_raw(path: &Path, text: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).create(true).open(path)?;
    writeln!(file, "{text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_line_buffer_reassembles_lines() {
        let bus = EventBus::new(64);
        let tmp = TempDir::new().unwrap();
        let mut log = LogBatcher::new(bus.emitter_for(1, 1, "p"), tmp.path().join("pipeline.log"));

        let mut buf = LineBuffer::new("[thinking]");
        buf.push("partial", &mut log);
        buf.push(" line\nand more\ntail", &mut log);
        buf.flush(&mut log);
        log.finish();

        let content = std::fs::read_to_string(tmp.path().join("pipeline.log")).unwrap();
        assert!(content.contains("[thinking] partial line"));
        assert!(content.contains("[thinking] and more"));
        assert!(content.contains("[thinking] tail"));
    }
}
