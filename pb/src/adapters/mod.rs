//! Judge adapters: capability contracts, registry, and built-in judges
//!
//! An adapter bundles a judge's fetcher, uploader, submitter, and editorial
//! provider behind one `name`. Instances are registered once per process and
//! hold no per-call state; the caller's identity arrives via
//! [`AdapterContext`] on every operation.

mod capability;
mod codeforces;
mod context;
mod hydro;
mod luogu;
mod manual;
mod registry;
pub mod types;

use std::path::Path;

use async_trait::async_trait;

pub use capability::Capability;
pub use codeforces::CodeforcesAdapter;
pub use context::AdapterContext;
pub use hydro::HydroAdapter;
pub use luogu::LuoguAdapter;
pub use manual::ManualAdapter;
pub use registry::AdapterRegistry;
pub use types::{
    AdapterError, HealthReport, HealthStatus, JudgeAuth, SolutionData, SubmissionStatus,
    SubmitOutcome, UploadOutcome, Verdict,
};

use problemstore::ProblemData;

/// One pluggable judge
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn capabilities(&self) -> &[Capability];

    /// Tie-break for URL dispatch, 0-100
    fn priority(&self) -> u8 {
        50
    }

    /// Idempotent; adapters stay registered even when this fails, but their
    /// operations must then fail fast
    fn initialize(&self, _ctx: &AdapterContext) -> bool {
        true
    }

    fn health_check(&self) -> HealthReport {
        HealthReport::ready(format!("{} ready", self.display_name()))
    }

    fn shutdown(&self) {}

    /// Log in with the caller's stored credentials
    async fn authenticate(&self, _ctx: &AdapterContext) -> Result<JudgeAuth, AdapterError> {
        JudgeAuth::anonymous()
    }

    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        None
    }

    fn uploader(&self) -> Option<&dyn DataUploader> {
        None
    }

    fn submitter(&self) -> Option<&dyn SolutionSubmitter> {
        None
    }

    fn training_manager(&self) -> Option<&dyn TrainingManager> {
        None
    }

    fn solution_provider(&self) -> Option<&dyn SolutionProvider> {
        None
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether this adapter's fetcher recognizes the input
    fn supports_url(&self, url: &str) -> bool {
        self.fetcher().is_some_and(|f| f.supports_url(url))
    }
}

/// `FetchProblem` capability
#[async_trait]
pub trait ProblemFetcher: Send + Sync {
    fn supports_url(&self, url: &str) -> bool;

    /// Map a URL or raw id to the judge's origin id, e.g. `1234A`
    fn parse_problem_id(&self, input: &str) -> Option<String>;

    /// Rebuild a canonical URL from an origin id, when the judge has one
    fn build_url(&self, _origin_id: &str) -> Option<String> {
        None
    }

    async fn fetch_problem(&self, ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError>;
}

/// `UploadData` capability
#[async_trait]
pub trait DataUploader: Send + Sync {
    /// Create the remote problem if needed and push the testcase archive;
    /// `skip_update` leaves existing remote testdata untouched
    async fn upload_testcases(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        problem_id: &str,
        archive: &Path,
        skip_update: bool,
    ) -> Result<UploadOutcome, AdapterError>;

    fn supports_format(&self, kind: &str) -> bool {
        kind.eq_ignore_ascii_case("zip")
    }

    /// Exact-title search on the destination; `Ok(None)` when absent
    async fn search_exact_title(
        &self,
        _ctx: &AdapterContext,
        _auth: &JudgeAuth,
        _title: &str,
    ) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    /// Public URL of an uploaded problem
    fn problem_url(&self, _ctx: &AdapterContext, _real_id: &str) -> Option<String> {
        None
    }
}

/// `SubmitSolution` capability
#[async_trait]
pub trait SolutionSubmitter: Send + Sync {
    async fn submit_solution(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        problem_id: &str,
        code: &str,
        language_key: &str,
    ) -> Result<SubmitOutcome, AdapterError>;

    async fn submission_status(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        submission_id: &str,
    ) -> Result<SubmissionStatus, AdapterError>;

    fn supported_languages(&self) -> Vec<String>;

    /// Map a generic hint ("C++") to the judge's language key
    fn default_language(&self, hint: &str) -> String;
}

/// `ManageTraining` capability: problem lists on the destination judge
#[async_trait]
pub trait TrainingManager: Send + Sync {
    /// Create a training/problem list, returning its remote id
    async fn create_training(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        title: &str,
        description: &str,
    ) -> Result<String, AdapterError>;

    async fn add_problems(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        training_id: &str,
        problem_ids: &[String],
    ) -> Result<(), AdapterError>;

    async fn get_training(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        training_id: &str,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// `ProvideSolution` capability
#[async_trait]
pub trait SolutionProvider: Send + Sync {
    async fn has_official_solution(&self, ctx: &AdapterContext, origin_id: &str) -> bool;

    async fn fetch_solution(
        &self,
        ctx: &AdapterContext,
        origin_id: &str,
    ) -> Result<Option<SolutionData>, AdapterError>;
}
