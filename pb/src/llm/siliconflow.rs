//! SiliconFlow client: the OCR-capable provider
//!
//! Same OpenAI-compatible wire shape, plus vision messages for statement
//! images. Callers treat absence of this provider as "image OCR disabled".

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{
    ChatOutcome, ChatRequest, LlmClient, StreamChunk, call_with_retries, classify_status,
    parse_openai_response, recover_from_reasoning, run_openai_sse,
};
use super::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";
const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-OCR";

const OCR_PROMPT: &str = "Transcribe every piece of text in this image exactly, keeping line structure.";

pub struct SiliconFlowClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl SiliconFlowClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingKey("siliconflow".into()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(SiliconFlowClient {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
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

    fn build_ocr_body(&self, image_url: &str, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": image_url } },
                    { "type": "text", "text": prompt },
                ],
            }],
            "max_tokens": 8192,
        })
    }
}

#[async_trait]
impl LlmClient for SiliconFlowClient {
    fn provider_name(&self) -> &'static str {
        "siliconflow"
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn chat_completion(
        &self,
        request: ChatRequest,
        chunks: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        debug!(model = %self.model, stream = chunks.is_some(), "siliconflow chat_completion");
        call_with_retries("siliconflow", |_| self.attempt(&request, chunks.as_ref())).await
    }

    async fn ocr_image(&self, image_url: &str, prompt: Option<&str>) -> Result<String, LlmError> {
        let body = self.build_ocr_body(image_url, prompt.unwrap_or(OCR_PROMPT));
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, None, text));
        }
        let body: serde_json::Value = response.json().await?;
        let (content, _) = parse_openai_response(&body);
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SiliconFlowClient {
        SiliconFlowClient::new("sk-test".into(), None, None, std::time::Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_vision_flag() {
        assert!(client().supports_vision());
    }

    #[test]
    fn test_ocr_body_shape() {
        let body = client().build_ocr_body("https://img.example/x.png", OCR_PROMPT);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "https://img.example/x.png");
        assert_eq!(content[1]["type"], "text");
    }
}
