//! The uniform streaming chat contract all providers implement
//!
//! One request type, one outcome type: `(content, reasoning)`. Streaming
//! providers additionally push every delta through an mpsc channel so the
//! pipeline can forward chunks to the event bus while the call is in
//! flight; non-streaming providers synthesize a single-chunk stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest_eventsource::{Event, EventSource};
use std::sync::LazyLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::LlmError;

/// Default output budget; individual providers cap it further
pub const DEFAULT_MAX_TOKENS: u32 = 65_536;

/// One chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Override of the provider's configured model
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        ChatRequest {
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Aggregated result of one chat call
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub reasoning: Option<String>,
}

/// One streamed delta: thought and answer arrive on separate tracks
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Reasoning(String),
    Content(String),
}

/// Every provider speaks this interface
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn model_name(&self) -> String;

    fn supports_vision(&self) -> bool {
        false
    }

    /// Run one completion. When `chunks` is given the provider streams and
    /// forwards every delta; the returned outcome always aggregates the
    /// full content and reasoning.
    async fn chat_completion(
        &self,
        request: ChatRequest,
        chunks: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError>;

    /// OCR an image; only vision-capable providers implement this
    async fn ocr_image(&self, _image_url: &str, _prompt: Option<&str>) -> Result<String, LlmError> {
        Err(LlmError::Unsupported("image OCR"))
    }
}

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)```(?:python|py|cpp|c\+\+|rust)?\s*\n?(.*?)```").expect("static regex")
});

/// Reasoning models occasionally emit the code only inside the thought
/// stream; recover the last fenced block when the answer track is empty
pub fn recover_from_reasoning(content: String, reasoning: Option<String>) -> Result<ChatOutcome, LlmError> {
    if !content.is_empty() {
        return Ok(ChatOutcome { content, reasoning });
    }
    if let Some(reasoning_text) = &reasoning
        && !reasoning_text.is_empty()
    {
        if let Some(block) = CODE_BLOCK_RE
            .captures_iter(reasoning_text)
            .last()
            .map(|caps| caps[1].trim().to_string())
            .filter(|code| !code.is_empty())
        {
            warn!("content empty, recovered code block from reasoning");
            return Ok(ChatOutcome {
                content: block,
                reasoning,
            });
        }
        return Err(LlmError::EmptyResponse);
    }
    Err(LlmError::EmptyResponse)
}

/// Retry schedule shared by the providers: up to 5 attempts, honoring
/// `Retry-After` when the server supplies one
pub(super) async fn call_with_retries<F, Fut>(provider: &str, mut attempt_call: F) -> Result<ChatOutcome, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ChatOutcome, LlmError>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 1;
    loop {
        match attempt_call(attempt).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if attempt < MAX_ATTEMPTS && err.is_retryable() => {
                let delay = err
                    .retry_after()
                    .unwrap_or_else(|| Duration::from_secs(2u64.saturating_pow(attempt)));
                warn!(provider, attempt, ?delay, error = %err, "LLM call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Classify a non-success HTTP status, extracting `Retry-After` on 429/5xx
pub(super) fn classify_status(status: reqwest::StatusCode, retry_after: Option<u64>, body: String) -> LlmError {
    let code = status.as_u16();
    if code == 429 || code >= 500 {
        LlmError::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(0)).max(Duration::from_secs(2)),
        }
    } else {
        LlmError::ApiError {
            status: code,
            message: body,
        }
    }
}

/// Drive one OpenAI-compatible SSE stream to completion, forwarding deltas
///
/// Returns `(content, reasoning, finish_reason)`. All three concrete
/// providers speak this wire shape.
pub(super) async fn run_openai_sse(
    request_builder: reqwest::RequestBuilder,
    chunk_tx: Option<&mpsc::Sender<StreamChunk>>,
) -> Result<(String, Option<String>, Option<String>), LlmError> {
    let mut es = EventSource::new(request_builder).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut finish_reason: Option<String> = None;

    while let Some(event) = es.next().await {
        match event {
            Ok(Event::Open) => {}
            Ok(Event::Message(msg)) => {
                if msg.data.trim() == "[DONE]" {
                    break;
                }
                let data: serde_json::Value = match serde_json::from_str(&msg.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let Some(choice) = data["choices"].get(0) else {
                    continue;
                };
                if let Some(reason) = choice["finish_reason"].as_str() {
                    finish_reason = Some(reason.to_string());
                }
                let delta = &choice["delta"];
                if let Some(chunk) = delta["reasoning_content"].as_str()
                    && !chunk.is_empty()
                {
                    reasoning.push_str(chunk);
                    if let Some(tx) = chunk_tx {
                        let _ = tx.send(StreamChunk::Reasoning(chunk.to_string())).await;
                    }
                }
                if let Some(chunk) = delta["content"].as_str()
                    && !chunk.is_empty()
                {
                    content.push_str(chunk);
                    if let Some(tx) = chunk_tx {
                        let _ = tx.send(StreamChunk::Content(chunk.to_string())).await;
                    }
                }
            }
            Err(reqwest_eventsource::Error::StreamEnded) => break,
            Err(e) => {
                debug!(error = %e, "SSE stream error");
                es.close();
                return Err(LlmError::InvalidResponse(e.to_string()));
            }
        }
    }
    es.close();

    // A filter stop with nothing salvageable is a hard error
    if finish_reason.as_deref() == Some("content_filter") && content.is_empty() && reasoning.is_empty() {
        return Err(LlmError::ContentFiltered);
    }

    Ok((content, (!reasoning.is_empty()).then_some(reasoning), finish_reason))
}

/// Parse a non-streaming OpenAI-compatible response body
pub(super) fn parse_openai_response(body: &serde_json::Value) -> (String, Option<String>) {
    let message = &body["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();
    let reasoning = message["reasoning_content"]
        .as_str()
        .filter(|r| !r.is_empty())
        .map(String::from);
    (content, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_prefers_content() {
        let outcome = recover_from_reasoning("answer".into(), Some("thoughts".into())).unwrap();
        assert_eq!(outcome.content, "answer");
    }

    #[test]
    fn test_recover_extracts_last_block() {
        let reasoning = "first try:\n```python\nprint(1)\n```\nbetter:\n```python\nprint(2)\n```";
        let outcome = recover_from_reasoning(String::new(), Some(reasoning.into())).unwrap();
        assert_eq!(outcome.content, "print(2)");
    }

    #[test]
    fn test_recover_fails_without_code() {
        let err = recover_from_reasoning(String::new(), Some("just prose".into())).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
        let err = recover_from_reasoning(String::new(), None).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(30), String::new());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        let err = classify_status(reqwest::StatusCode::BAD_GATEWAY, None, String::new());
        assert!(err.is_retryable());

        let err = classify_status(reqwest::StatusCode::BAD_REQUEST, None, "oops".into());
        assert!(matches!(err, LlmError::ApiError { status: 400, .. }));
    }

    #[test]
    fn test_parse_openai_response() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "hi", "reasoning_content": "hmm"}}]
        });
        let (content, reasoning) = parse_openai_response(&body);
        assert_eq!(content, "hi");
        assert_eq!(reasoning.as_deref(), Some("hmm"));

        let body = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        let (_, reasoning) = parse_openai_response(&body);
        assert!(reasoning.is_none());
    }

    #[tokio::test]
    async fn test_call_with_retries_gives_up_on_non_retryable() {
        let mut calls = 0;
        let result = call_with_retries("test", |_| {
            calls += 1;
            async {
                Err(LlmError::ApiError {
                    status: 400,
                    message: "bad".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
