//! probatch - multi-tenant batch pipeline for competitive-programming
//! problems
//!
//! One user request becomes a bounded, recoverable, observable execution of
//! up to four stages per problem: **fetch** the statement from an origin
//! judge, **gen** test data with an LLM and self-validate a reference
//! solution, **upload** statement + testdata to a destination judge, and
//! **solve** by submitting an LLM solution and polling the verdict.
//!
//! # Modules
//!
//! - [`tasks`] - batch creation, the bounded worker pool, reconciliation
//! - [`pipeline`] - the per-problem stage state machine
//! - [`adapters`] - judge adapters, capability contracts, registry
//! - [`llm`] - the uniform streaming chat layer over all providers
//! - [`concurrency`] - semaphore pool, cancel tokens, the submit gate
//! - [`events`] - pub/sub progress events and log batching
//! - [`users`] - per-user auth caches and task counters
//! - [`resolver`] - canonical problem ids and workspace paths
//! - [`prompts`] - template assembly and response post-processing
//! - [`config`] - configuration types and loading

pub mod adapters;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod daemon;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod resolver;
pub mod tasks;
pub mod users;

// Re-export commonly used types
pub use adapters::{Adapter, AdapterContext, AdapterError, AdapterRegistry, Capability, JudgeAuth, Verdict};
pub use concurrency::{Backoff, CancelToken, SemaphorePool, SubmitGate, interruptible_sleep, retry_with_backoff};
pub use config::Config;
pub use daemon::Daemon;
pub use events::{EventBus, EventFilter, EventKind, LogBatcher, TaskEvent};
pub use llm::{ChatOutcome, ChatRequest, LlmClient, LlmError, StreamChunk};
pub use pipeline::{
    DefaultLlmFactory, LlmFactory, ModuleSelection, PipelineDeps, PipelineRunner, RunOutcome,
    SolutionSearcher, TaskOverrides,
};
pub use prompts::{PromptProvider, TemplatePrompts};
pub use resolver::ProblemIdResolver;
pub use tasks::{CreatedTask, TaskConfig, TaskService};
pub use users::{LoginRateLimiter, UserContext, UserContextRegistry};
