//! The four-stage pipeline: fetch → gen → upload → solve
//!
//! [`PipelineRunner`] executes the stages for one problem, honoring module
//! flags, driving retries with temperature annealing, and emitting progress
//! through the event bus. Stage-level errors never escape the runner; they
//! are folded into the [`RunOutcome`] the task service reconciles.

mod chat;
mod r#gen;
mod runner;
mod searcher;
mod solve;
pub mod types;
mod upload;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use problemstore::{Database, SecretStore, Workspace};

use crate::adapters::{AdapterContext, AdapterRegistry};
use crate::concurrency::{CancelToken, SemaphorePool, SubmitGate};
use crate::config::Config;
use crate::events::EventBus;
use crate::llm::LlmClient;
use crate::prompts::PromptProvider;
use crate::resolver::ProblemIdResolver;
use crate::users::UserContextRegistry;

pub use runner::{PipelineRunner, TaskOverrides};
pub use searcher::SolutionSearcher;
pub use types::{
    DefaultLlmFactory, LlmFactory, ModuleSelection, PipelineError, RetryEntry, RunOutcome,
};
pub use validate::{ValidationOutcome, validate_solution};

/// Shared services every runner borrows
pub struct PipelineDeps {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub secrets: Arc<SecretStore>,
    pub events: Arc<EventBus>,
    pub registry: Arc<AdapterRegistry>,
    pub resolver: Arc<ProblemIdResolver>,
    pub sems: Arc<SemaphorePool>,
    pub submit_gate: Arc<SubmitGate>,
    pub users: Arc<UserContextRegistry>,
    pub prompts: Arc<dyn PromptProvider>,
    pub llm_factory: Arc<dyn LlmFactory>,
    pub workspace_base: PathBuf,
}

impl PipelineDeps {
    /// Per-call adapter context carrying the caller's identity
    pub fn adapter_context(&self, user_id: i64) -> AdapterContext {
        AdapterContext {
            user_id,
            db: self.db.clone(),
            secrets: self.secrets.clone(),
            events: self.events.clone(),
            workspace_base: self.workspace_base.clone(),
        }
    }
}

/// Borrowed bundle the stage functions operate on
pub(crate) struct StageEnv<'a> {
    pub deps: &'a PipelineDeps,
    pub actx: &'a AdapterContext,
    pub workspace: &'a Workspace,
    pub canonical_id: &'a str,
    /// Absent on runs with no LLM-backed stage (e.g. upload-only)
    pub llm: Option<&'a Arc<dyn LlmClient>>,
    pub token: &'a CancelToken,
}

impl StageEnv<'_> {
    pub(crate) fn llm(&self) -> Result<&dyn LlmClient, types::PipelineError> {
        self.llm
            .map(|client| client.as_ref())
            .ok_or_else(|| types::PipelineError::EmptyCode("no LLM client configured".into()))
    }
}
