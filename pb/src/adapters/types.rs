//! Wire-adjacent types shared by all adapters

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by adapter operations, classified for backoff decisions
#[derive(Debug, Error)]
pub enum AdapterError {
    /// 404-class: the problem or record does not exist on the judge
    #[error("not found: {0}")]
    NotFound(String),

    /// 401-class: the cached session is no longer valid
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// 429/403-class or message-matched throttling
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The adapter does not declare the requested capability
    #[error("{adapter} does not support {operation}")]
    Unsupported {
        adapter: &'static str,
        operation: &'static str,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{adapter} configuration missing field `{field}`")]
    ConfigMissing { adapter: &'static str, field: &'static str },

    /// Title matched but other fields diverge; never overwrite silently
    #[error("refusing to overwrite remote problem: {0}")]
    RefusedOverwrite(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] problemstore::StoreError),

    #[error("{0}")]
    Remote(String),
}

impl AdapterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, AdapterError::AuthExpired(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AdapterError::RateLimited(_))
    }

    /// Classify an HTTP status + body into the retry taxonomy
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => AdapterError::AuthExpired(body),
            403 | 429 => AdapterError::RateLimited(body),
            404 => AdapterError::NotFound(body),
            s if s >= 500 => AdapterError::Remote(format!("server error {s}: {body}")),
            s => AdapterError::Remote(format!("unexpected status {s}: {body}")),
        }
    }
}

/// Authenticated session against one judge: a bearer-ish token plus the
/// long-lived HTTP client whose cookie jar holds the login state
#[derive(Clone)]
pub struct JudgeAuth {
    pub token: String,
    pub client: reqwest::Client,
}

impl JudgeAuth {
    /// Anonymous session for judges that need no login on reads
    pub fn anonymous() -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(JudgeAuth {
            token: String::new(),
            client,
        })
    }
}

impl std::fmt::Debug for JudgeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token
        f.debug_struct("JudgeAuth")
            .field("token_len", &self.token.len())
            .finish()
    }
}

/// Raw upload response plus the success flag the runner keys on
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub ok: bool,
    /// Whether a new remote problem was created (vs testdata update)
    pub created: bool,
    pub raw: serde_json::Value,
}

/// Result of a submit RPC
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub submission_id: String,
    pub record_url: Option<String>,
    pub message: String,
}

/// Normalized judge verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    PartiallyAccepted,
    Judging,
    Other(String),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Verdict::Judging)
    }

    /// Short tag used in retry context entries
    pub fn tag(&self) -> &str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::PartiallyAccepted => "PAC",
            Verdict::Judging => "JUDGING",
            Verdict::Other(s) => s,
        }
    }
}

/// Polled submission state
#[derive(Debug, Clone)]
pub struct SubmissionStatus {
    pub verdict: Verdict,
    pub score: Option<f64>,
    pub error_message: Option<String>,
    pub raw: serde_json::Value,
}

/// An editorial / reference solution returned by `ProvideSolution`
#[derive(Debug, Clone)]
pub struct SolutionData {
    pub language: String,
    pub code: String,
    pub source_url: Option<String>,
}

/// Adapter health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: HealthStatus,
    pub message: String,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ready,
    Degraded,
    Unhealthy,
}

impl HealthReport {
    pub fn ready(message: impl Into<String>) -> Self {
        HealthReport {
            healthy: true,
            status: HealthStatus::Ready,
            message: message.into(),
            metrics: serde_json::json!({}),
        }
    }
}
