//! DeepSeek client: the reasoning-focused provider
//!
//! Speaks the OpenAI-compatible chat API with the extra
//! `reasoning_content` delta track the reasoner models emit.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{
    ChatOutcome, ChatRequest, LlmClient, StreamChunk, call_with_retries, classify_status,
    parse_openai_response, recover_from_reasoning, run_openai_sse,
};
use super::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_MODEL: &str = "deepseek-reasoner";

pub struct DeepSeekClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingKey("deepseek".into()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(DeepSeekClient {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http,
        })
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stream": stream,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        chunks: Option<&mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        if let Some(tx) = chunks {
            let builder = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&self.build_body(request, true));
            let (content, reasoning, _) = run_openai_sse(builder, Some(tx)).await?;
            recover_from_reasoning(content, reasoning)
        } else {
            let response = self
                .http
                .post(self.endpoint())
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
impl LlmClient for DeepSeekClient {
    fn provider_name(&self) -> &'static str {
        "deepseek"
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn chat_completion(
        &self,
        request: ChatRequest,
        chunks: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        debug!(model = %self.model, stream = chunks.is_some(), "deepseek chat_completion");
        call_with_retries("deepseek", |_| self.attempt(&request, chunks.as_ref())).await
    }
}
