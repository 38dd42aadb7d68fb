//! Pipeline-level types: module selection, retry context, outcomes

use std::sync::Arc;
use thiserror::Error;

use crate::adapters::AdapterError;
use crate::concurrency::SlotTimeout;
use crate::llm::{LlmClient, LlmError};

/// Which stages a task runs; any subset is legal, order stays fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSelection {
    pub fetch: bool,
    pub r#gen: bool,
    pub upload: bool,
    pub solve: bool,
}

impl ModuleSelection {
    pub fn all() -> Self {
        ModuleSelection {
            fetch: true,
            r#gen: true,
            upload: true,
            solve: true,
        }
    }

    /// Single-module selection for retries; `"all"` selects everything
    pub fn for_retry(module: &str) -> Option<Self> {
        match module {
            "all" => Some(ModuleSelection::all()),
            "fetch" => Some(ModuleSelection {
                fetch: true,
                r#gen: false,
                upload: false,
                solve: false,
            }),
            "gen" => Some(ModuleSelection {
                fetch: false,
                r#gen: true,
                upload: false,
                solve: false,
            }),
            "upload" => Some(ModuleSelection {
                fetch: false,
                r#gen: false,
                upload: true,
                solve: false,
            }),
            "solve" => Some(ModuleSelection {
                fetch: false,
                r#gen: false,
                upload: false,
                solve: true,
            }),
            _ => None,
        }
    }
}

impl Default for ModuleSelection {
    fn default() -> Self {
        ModuleSelection::all()
    }
}

/// One failed attempt, fed back into the next prompt
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub attempt: u32,
    /// Verdict tag or truncated error summary
    pub summary: String,
    /// First part of the code that failed, when available
    pub code_snippet: Option<String>,
    pub temperature: f32,
}

/// Snippets in retry entries are truncated to this many chars
pub const SNIPPET_LIMIT: usize = 500;

/// Only the most recent entries are rendered into the prompt
pub const RETRY_CONTEXT_WINDOW: usize = 2;

/// Render the rolling retry context for prompt inclusion
pub fn render_retry_context(entries: &[RetryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut text = String::from("\n\n--- Previous attempts ---\n");
    let start = entries.len().saturating_sub(RETRY_CONTEXT_WINDOW);
    for entry in &entries[start..] {
        text.push_str(&format!(
            "\n**Attempt {} (temperature {:.2})**:\n{}\n",
            entry.attempt, entry.temperature, entry.summary
        ));
        if let Some(snippet) = &entry.code_snippet {
            let truncated: String = snippet.chars().take(SNIPPET_LIMIT).collect();
            text.push_str(&format!("```\n{truncated}...\n```\n"));
        }
    }
    text.push_str("\nAvoid repeating the mistakes above and produce a corrected version.\n");
    text
}

/// Terminal result of one pipeline run, reconciled into the task row
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub problem_id: String,
    pub ok_fetch: bool,
    pub ok_gen: bool,
    pub ok_upload: bool,
    pub ok_solve: bool,
    pub uploaded_url: Option<String>,
    pub error: Option<String>,
    pub cancelled: bool,
    /// Last stage the runner reached
    pub stage: String,
    pub elapsed_secs: f64,
}

impl RunOutcome {
    pub fn new(problem_id: impl Into<String>) -> Self {
        RunOutcome {
            problem_id: problem_id.into(),
            stage: "pending".into(),
            ..Default::default()
        }
    }

    /// A run succeeds when every enabled module succeeded
    pub fn success(&self, modules: ModuleSelection) -> bool {
        if self.cancelled || self.error.is_some() {
            return false;
        }
        let mut checks = Vec::new();
        if modules.fetch {
            checks.push(self.ok_fetch);
        }
        if modules.r#gen {
            checks.push(self.ok_gen);
        }
        if modules.upload {
            checks.push(self.ok_upload);
        }
        if modules.solve {
            checks.push(self.ok_solve);
        }
        checks.is_empty() || checks.into_iter().all(|ok| ok)
    }
}

/// Stage-internal error plumbing; mapped to stage outcomes, never escaping
/// the runner except as a recorded message
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] problemstore::StoreError),

    #[error(transparent)]
    Slot(#[from] SlotTimeout),

    #[error("generator execution failed: {0}")]
    Generator(String),

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("local validation failed: {0}")]
    ValidationFailed(String),

    #[error("no usable code in response: {0}")]
    EmptyCode(String),

    #[error("task cancelled")]
    Cancelled,
}

/// Wait-duration classes for solve retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    NotFound,
    AuthExpired,
    Other,
}

impl PipelineError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            PipelineError::Adapter(e) if e.is_rate_limited() => ErrorClass::RateLimited,
            PipelineError::Adapter(e) if e.is_not_found() => ErrorClass::NotFound,
            PipelineError::Adapter(e) if e.is_auth_expired() => ErrorClass::AuthExpired,
            PipelineError::Llm(LlmError::RateLimited { .. }) => ErrorClass::RateLimited,
            _ => ErrorClass::Other,
        }
    }

    pub fn is_compile_error(&self) -> bool {
        matches!(self, PipelineError::CompileError(_))
    }
}

/// Provider construction seam; tests install scripted clients here
pub trait LlmFactory: Send + Sync {
    fn create(&self, provider: &str, config: &serde_json::Value) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Production factory over the provider registry in [`crate::llm`]
pub struct DefaultLlmFactory {
    pub timeout: std::time::Duration,
}

impl LlmFactory for DefaultLlmFactory {
    fn create(&self, provider: &str, config: &serde_json::Value) -> Result<Arc<dyn LlmClient>, LlmError> {
        crate::llm::create_client(provider, config, self.timeout)
    }
}
