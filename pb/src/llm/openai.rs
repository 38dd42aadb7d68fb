//! OpenAI-compatible bridge
//!
//! Covers any endpoint speaking the OpenAI chat schema. Models that take a
//! separate thinking budget get it passed through alongside the output
//! token cap.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{
    ChatOutcome, ChatRequest, LlmClient, StreamChunk, call_with_retries, classify_status,
    parse_openai_response, recover_from_reasoning, run_openai_sse,
};
use super::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiCompatClient {
    api_key: String,
    base_url: String,
    model: String,
    thinking_budget: Option<u32>,
    max_output_tokens: Option<u32>,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        thinking_budget: Option<u32>,
        max_output_tokens: Option<u32>,
        timeout: std::time::Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingKey("openai".into()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(OpenAiCompatClient {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            thinking_budget,
            max_output_tokens,
            http,
        })
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let max_tokens = self.max_output_tokens.unwrap_or(request.max_tokens);
        let mut body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stream": stream,
        });
        if let Some(budget) = self.thinking_budget {
            body["thinking"] = serde_json::json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        chunks: Option<&mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        if let Some(tx) = chunks {
            let builder = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&self.build_body(request, true));
            let (content, reasoning, _) = run_openai_sse(builder, Some(tx)).await?;
            recover_from_reasoning(content, reasoning)
        } else {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&self.build_body(request, false))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok());
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, retry_after, body));
            }
            let body: serde_json::Value = response.json().await?;
            let (content, reasoning) = parse_openai_response(&body);
            recover_from_reasoning(content, reasoning)
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn chat_completion(
        &self,
        request: ChatRequest,
        chunks: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        debug!(model = %self.model, stream = chunks.is_some(), "openai chat_completion");
        call_with_retries("openai", |_| self.attempt(&request, chunks.as_ref())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_budget_passthrough() {
        let client = OpenAiCompatClient::new(
            "sk-test".into(),
            None,
            Some("some-reasoner".into()),
            Some(16_384),
            Some(65_536),
            std::time::Duration::from_secs(60),
        )
        .unwrap();
        let body = client.build_body(&ChatRequest::new("hi"), false);
        assert_eq!(body["thinking"]["budget_tokens"], 16_384);
        assert_eq!(body["max_tokens"], 65_536);
    }

    #[test]
    fn test_single_budget_when_unconfigured() {
        let client = OpenAiCompatClient::new(
            "sk-test".into(),
            None,
            None,
            None,
            None,
            std::time::Duration::from_secs(60),
        )
        .unwrap();
        let body = client.build_body(&ChatRequest::new("hi"), false);
        assert!(body.get("thinking").is_none());
        assert_eq!(body["max_tokens"], super::super::client::DEFAULT_MAX_TOKENS);
        assert_eq!(body["model"], DEFAULT_MODEL);
    }
}
