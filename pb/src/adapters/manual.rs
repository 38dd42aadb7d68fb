//! Manual adapter: problems pasted by the user instead of crawled
//!
//! The caller drops a `problem_data.json` into the workspace directory for
//! `manual_<marker>`; the fetcher simply reads it back. This keeps manually
//! entered problems on the same pipeline path as crawled ones.

use async_trait::async_trait;

use problemstore::{ProblemData, Workspace};

use super::types::AdapterError;
use super::{Adapter, AdapterContext, Capability, ProblemFetcher};

pub struct ManualAdapter {
    fetcher: ManualFetcher,
}

impl ManualAdapter {
    pub fn new() -> Self {
        ManualAdapter { fetcher: ManualFetcher }
    }
}

impl Default for ManualAdapter {
    fn default() -> Self {
        ManualAdapter::new()
    }
}

#[async_trait]
impl Adapter for ManualAdapter {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn display_name(&self) -> &'static str {
        "Manual paste"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::FetchProblem]
    }

    /// Low priority so real judges win URL dispatch
    fn priority(&self) -> u8 {
        10
    }

    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        Some(&self.fetcher)
    }
}

struct ManualFetcher;

/// Fresh marker for a newly pasted problem
pub fn new_manual_marker() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

#[async_trait]
impl ProblemFetcher for ManualFetcher {
    fn supports_url(&self, url: &str) -> bool {
        url.starts_with("manual_") || url.starts_with("manual:")
    }

    fn parse_problem_id(&self, input: &str) -> Option<String> {
        input
            .strip_prefix("manual_")
            .or_else(|| input.strip_prefix("manual:"))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }

    async fn fetch_problem(&self, ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError> {
        let workspace = Workspace::for_problem(&ctx.workspace_base, ctx.user_id, &format!("manual_{origin_id}"));
        workspace.load_problem().ok_or_else(|| {
            AdapterError::NotFound(format!(
                "no pasted statement for manual_{origin_id}; save problem_data.json first"
            ))
        })
    }
}
