//! LLM stream layer
//!
//! A single [`LlmClient`] contract over three concrete providers: the
//! reasoning-focused DeepSeek client, the OCR-capable SiliconFlow client,
//! and an OpenAI-compatible bridge covering everything else. The factory
//! selects by a task-time provider string and reads the caller's decrypted
//! API keys from their per-user `llm` config blob.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

mod client;
mod deepseek;
mod error;
mod openai;
mod siliconflow;

pub use client::{ChatOutcome, ChatRequest, DEFAULT_MAX_TOKENS, LlmClient, StreamChunk, recover_from_reasoning};
pub use deepseek::DeepSeekClient;
pub use error::LlmError;
pub use openai::OpenAiCompatClient;
pub use siliconflow::SiliconFlowClient;

/// Default total request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

fn config_string(config: &serde_json::Value, key: &str) -> Option<String> {
    config[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Create a client for the given provider string
///
/// `config` is the caller's decrypted `llm` config blob holding per-provider
/// keys, endpoints, and model overrides.
pub fn create_client(
    provider: &str,
    config: &serde_json::Value,
    timeout: Duration,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider, "create_client");
    match provider.to_lowercase().as_str() {
        "deepseek" => {
            let api_key = config_string(config, "deepseek_api_key")
                .ok_or_else(|| LlmError::MissingKey("deepseek".into()))?;
            Ok(Arc::new(DeepSeekClient::new(
                api_key,
                config_string(config, "deepseek_api_url"),
                config_string(config, "deepseek_model"),
                timeout,
            )?))
        }
        "siliconflow" => {
            let api_key = config_string(config, "siliconflow_api_key")
                .ok_or_else(|| LlmError::MissingKey("siliconflow".into()))?;
            Ok(Arc::new(SiliconFlowClient::new(
                api_key,
                config_string(config, "siliconflow_api_url"),
                config_string(config, "siliconflow_model"),
                timeout,
            )?))
        }
        "openai" | "openai_compatible" => {
            let api_key = config_string(config, "openai_api_key")
                .ok_or_else(|| LlmError::MissingKey("openai".into()))?;
            Ok(Arc::new(OpenAiCompatClient::new(
                api_key,
                config_string(config, "openai_api_url"),
                config_string(config, "openai_model"),
                config["thinking_budget"].as_u64().map(|v| v as u32),
                config["max_output_tokens"].as_u64().map(|v| v as u32),
                timeout,
            )?))
        }
        other => Err(LlmError::InvalidResponse(format!(
            "unknown LLM provider `{other}`; supported: deepseek, siliconflow, openai"
        ))),
    }
}

/// The OCR client, if the caller configured one; `None` disables image OCR
pub fn create_ocr_client(config: &serde_json::Value, timeout: Duration) -> Option<Arc<dyn LlmClient>> {
    create_client("siliconflow", config, timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_provider() {
        let config = serde_json::json!({
            "deepseek_api_key": "sk-a",
            "openai_api_key": "sk-b",
            "siliconflow_api_key": "sk-c",
        });
        for (provider, expected) in [
            ("deepseek", "deepseek"),
            ("openai", "openai"),
            ("OpenAI_Compatible", "openai"),
            ("siliconflow", "siliconflow"),
        ] {
            let client = create_client(provider, &config, DEFAULT_TIMEOUT).unwrap();
            assert_eq!(client.provider_name(), expected);
        }
    }

    #[test]
    fn test_factory_missing_key() {
        let config = serde_json::json!({});
        assert!(matches!(
            create_client("deepseek", &config, DEFAULT_TIMEOUT),
            Err(LlmError::MissingKey(_))
        ));
    }

    #[test]
    fn test_factory_unknown_provider() {
        let config = serde_json::json!({"deepseek_api_key": "sk-a"});
        assert!(create_client("acme-llm", &config, DEFAULT_TIMEOUT).is_err());
    }

    #[test]
    fn test_ocr_client_optional() {
        assert!(create_ocr_client(&serde_json::json!({}), DEFAULT_TIMEOUT).is_none());
        let config = serde_json::json!({"siliconflow_api_key": "sk-c"});
        let client = create_ocr_client(&config, DEFAULT_TIMEOUT).unwrap();
        assert!(client.supports_vision());
    }
}
