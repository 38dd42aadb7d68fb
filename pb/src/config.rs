//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage locations
    pub storage: StorageConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Pipeline behavior
    pub pipeline: PipelineConfig,

    /// Local validation toolchain
    pub validation: ValidationConfig,

    /// LLM request limits
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".probatch.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("probatch").join("probatch.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Database path: `OJO_DATABASE` overrides the configured value
    pub fn database_path(&self) -> PathBuf {
        std::env::var("OJO_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.storage.database.clone())
    }

    /// Workspace base: config value, else the env/container/default chain
    pub fn workspace_base(&self) -> PathBuf {
        self.storage
            .workspace
            .clone()
            .unwrap_or_else(problemstore::workspace_base)
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database: PathBuf,

    /// Artifact workspace root; `None` falls back to `OJO_WORKSPACE` etc.
    pub workspace: Option<PathBuf>,

    /// Prompt template override directory
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/probatch.db"),
            workspace: None,
            prompts_dir: None,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Worker pool width for concurrent pipeline runs
    #[serde(rename = "max-global-tasks")]
    pub max_global_tasks: usize,

    /// Concurrent LLM calls
    #[serde(rename = "llm-slots")]
    pub llm_slots: usize,

    /// Concurrent reads against any one judge
    #[serde(rename = "remote-read-slots")]
    pub remote_read_slots: usize,

    /// Concurrent submissions / uploads; kept below the read width
    #[serde(rename = "remote-write-slots")]
    pub remote_write_slots: usize,

    /// Parallel compile-heavy validations
    #[serde(rename = "compile-slots")]
    pub compile_slots: usize,

    /// Minimum spacing between consecutive submits, milliseconds
    #[serde(rename = "min-submit-interval-ms")]
    pub min_submit_interval_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_global_tasks: 50,
            llm_slots: 2,
            remote_read_slots: 2,
            remote_write_slots: 1,
            compile_slots: 1,
            min_submit_interval_ms: 1000,
        }
    }
}

/// Pipeline behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Initial sampling temperature for data generation
    #[serde(rename = "temperature-generation")]
    pub temperature_generation: f32,

    /// Initial sampling temperature for solving
    #[serde(rename = "temperature-solution")]
    pub temperature_solution: f32,

    /// Attempts per retryable stage
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Wall-clock limit for generator execution, minutes
    #[serde(rename = "code-exec-timeout-minutes")]
    pub code_exec_timeout_minutes: u64,

    /// Wait for the compile slot before counting the attempt failed, seconds
    #[serde(rename = "compile-slot-timeout-secs")]
    pub compile_slot_timeout_secs: u64,

    /// Verdict poll period, seconds
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Overall verdict polling deadline, seconds
    #[serde(rename = "poll-deadline-secs")]
    pub poll_deadline_secs: u64,

    /// Base wait between failed attempts, seconds
    #[serde(rename = "retry-wait-secs")]
    pub retry_wait_secs: u64,

    /// Base wait after a failed local validation, seconds
    #[serde(rename = "validation-retry-wait-secs")]
    pub validation_retry_wait_secs: u64,

    /// Reuse a non-trivial existing solution.cpp during solve
    #[serde(rename = "solve-reuse-existing")]
    pub solve_reuse_existing: bool,

    /// Attach reference solutions found via `ProvideSolution` adapters
    #[serde(rename = "enable-solution-search")]
    pub enable_solution_search: bool,

    /// Command prefix that runs the generated script, e.g. `["python3"]`
    #[serde(rename = "generator-command")]
    pub generator_command: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temperature_generation: 0.3,
            temperature_solution: 0.3,
            max_attempts: 3,
            code_exec_timeout_minutes: 5,
            compile_slot_timeout_secs: 120,
            poll_interval_secs: 3,
            poll_deadline_secs: 240,
            retry_wait_secs: 30,
            validation_retry_wait_secs: 20,
            solve_reuse_existing: true,
            enable_solution_search: false,
            generator_command: vec!["python3".into()],
        }
    }
}

/// Local validation toolchain; `{source}`, `{binary}` are substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    #[serde(rename = "compile-command")]
    pub compile_command: Vec<String>,

    #[serde(rename = "run-command")]
    pub run_command: Vec<String>,

    /// Per-case run timeout, seconds
    #[serde(rename = "case-timeout-secs")]
    pub case_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            compile_command: vec![
                "g++".into(),
                "-O2".into(),
                "-std=c++17".into(),
                "-o".into(),
                "{binary}".into(),
                "{source}".into(),
            ],
            run_command: vec!["{binary}".into()],
            case_timeout_secs: 10,
        }
    }
}

/// LLM request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Total request timeout, minutes
    #[serde(rename = "request-timeout-minutes")]
    pub request_timeout_minutes: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_minutes: 5,
        }
    }
}
