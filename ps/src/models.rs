//! Row and document types shared between the database and artifact layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle status as persisted in the `tasks.status` column
///
/// The integer values are part of the storage format: `0` pending, `1`
/// running, `4` completed, `-1` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed => 4,
            TaskStatus::Failed => -1,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => TaskStatus::Running,
            4 => TaskStatus::Completed,
            -1 => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }

    /// Parse the filter keywords accepted by the task-list API
    pub fn parse_filter(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One row of the `tasks` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: String,
    pub status: TaskStatus,
    pub progress: i64,
    pub stage: String,
    pub source_judge: Option<String>,
    pub target_judge: Option<String>,
    pub uploaded_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied to a task row; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<i64>,
    pub stage: Option<String>,
    pub uploaded_url: Option<String>,
    /// `Some(None)` clears the column
    pub error_message: Option<Option<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Server-side filters for the task-list query
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    /// Substring match on the problem id
    pub search: Option<String>,
    pub status: Option<TaskStatus>,
    pub source_judge: Option<String>,
    pub target_judge: Option<String>,
    pub limit: Option<usize>,
}

/// A user row; only the columns the core reads
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// Per-user task counters derived from the tasks table
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub total: u64,
    pub completed: u64,
    pub running: u64,
    pub failed: u64,
    pub pending: u64,
}

/// One input/output sample pair of a problem statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: String,
    pub output: String,
}

/// Normalized problem statement as produced by every fetcher and persisted
/// as `problem_data.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemData {
    pub id: String,
    pub source: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// Typed view over `processing_status.json`
///
/// The file itself is merged field-by-field (see `Workspace::merge_status`),
/// so every field here is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_fetch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_gen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_upload: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_solve: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Destination problem id per upload adapter
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub upload_real_ids: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
}

impl ProcessingStatus {
    /// AC-confirmed: the artifact set may be reused and must not be
    /// garbage-collected
    pub fn is_completed(&self) -> bool {
        self.ok_solve == Some(true)
    }
}

/// Outcome of the last local validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub total_cases: u32,
    pub passed_cases: u32,
    #[serde(default)]
    pub failed_cases: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_i64(s.as_i64()), s);
        }
    }

    #[test]
    fn test_status_filter_keywords() {
        assert_eq!(TaskStatus::parse_filter("completed"), Some(TaskStatus::Completed));
        assert_eq!(TaskStatus::parse_filter("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_processing_status_completed() {
        let mut st = ProcessingStatus::default();
        assert!(!st.is_completed());
        st.ok_solve = Some(false);
        assert!(!st.is_completed());
        st.ok_solve = Some(true);
        assert!(st.is_completed());
    }

    #[test]
    fn test_problem_data_serde_defaults() {
        let json = r#"{"id":"codeforces_1A","source":"codeforces","title":"Theatre Square","description":"..."}"#;
        let data: ProblemData = serde_json::from_str(json).unwrap();
        assert!(data.samples.is_empty());
        assert!(data.time_limit_ms.is_none());
        assert_eq!(data.title, "Theatre Square");
    }
}
