//! Adapter capability declarations

use serde::{Deserialize, Serialize};

/// What an adapter can do; callers must not invoke operations outside the
/// declared set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    FetchProblem,
    UploadData,
    SubmitSolution,
    ManageTraining,
    JudgeStatus,
    BatchFetch,
    ProvideSolution,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::FetchProblem => "fetch_problem",
            Capability::UploadData => "upload_data",
            Capability::SubmitSolution => "submit_solution",
            Capability::ManageTraining => "manage_training",
            Capability::JudgeStatus => "judge_status",
            Capability::BatchFetch => "batch_fetch",
            Capability::ProvideSolution => "provide_solution",
        }
    }
}
