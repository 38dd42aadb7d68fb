//! The task service
//!
//! Accepts task batches, persists rows, dispatches pipeline runs onto a
//! bounded worker pool, and reconciles every outcome into the database and
//! the event bus. Admin callers may act on any task, but execution always
//! uses the owning user's configuration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use problemstore::{TaskFilters, TaskPatch, TaskRow, TaskStats, TaskStatus, Workspace};

use crate::concurrency::CancelToken;
use crate::pipeline::{ModuleSelection, PipelineDeps, PipelineRunner, RunOutcome, TaskOverrides};

const CANCELLED_MESSAGE: &str = "task cancelled";

/// Caller-facing execution configuration for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub enable_fetch: bool,
    pub enable_generation: bool,
    pub enable_upload: bool,
    pub enable_solve: bool,
    /// Global default fetch adapter
    pub source_adapter: Option<String>,
    /// Upload + submit adapter
    pub target_adapter: Option<String>,
    /// Per-problem fetch override; `"auto"` means unset
    pub problem_adapters: Option<HashMap<String, String>>,
    /// Single provider for both gen and solve
    pub llm_provider: String,
    /// Run even when the artifact set is already AC-confirmed; batches a
    /// user submits directly always force
    pub force: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            enable_fetch: true,
            enable_generation: true,
            enable_upload: true,
            enable_solve: true,
            source_adapter: None,
            target_adapter: None,
            problem_adapters: None,
            llm_provider: "deepseek".into(),
            force: true,
        }
    }
}

impl TaskConfig {
    /// Fetch adapter for one problem: per-problem override beats the
    /// global default; `"auto"` falls through to URL detection
    pub fn fetch_adapter_for(&self, problem_id: &str) -> Option<String> {
        if let Some(overrides) = &self.problem_adapters
            && let Some(adapter) = overrides.get(problem_id)
        {
            if adapter == "auto" {
                return None;
            }
            return Some(adapter.clone());
        }
        self.source_adapter.clone()
    }

    pub fn modules(&self) -> ModuleSelection {
        ModuleSelection {
            fetch: self.enable_fetch,
            r#gen: self.enable_generation,
            upload: self.enable_upload,
            solve: self.enable_solve,
        }
    }
}

/// One created row of a batch
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTask {
    pub id: i64,
    pub problem_id: String,
}

/// Accepts batches and owns their runtime state
pub struct TaskService {
    deps: Arc<PipelineDeps>,
    worker_slots: Arc<Semaphore>,
    cancelled: Arc<Mutex<HashSet<i64>>>,
    running: Arc<Mutex<HashMap<i64, CancelToken>>>,
    shutting_down: Arc<AtomicBool>,
}

impl TaskService {
    pub fn new(deps: Arc<PipelineDeps>) -> Arc<Self> {
        let workers = deps.config.concurrency.max_global_tasks.max(1);
        info!(workers, "task service ready");
        Arc::new(TaskService {
            deps,
            worker_slots: Arc::new(Semaphore::new(workers)),
            cancelled: Arc::new(Mutex::new(HashSet::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn lock_cancelled(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<i64, CancelToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Creation ===

    /// Allocate one row per problem; individual failures degrade to a
    /// skipped item, never failing the batch
    pub fn create_tasks(&self, user_id: i64, problem_ids: &[String], config: &TaskConfig) -> Vec<CreatedTask> {
        let mut created = Vec::new();
        for problem_id in problem_ids {
            match self.deps.db.create_task(
                user_id,
                problem_id,
                config.source_adapter.as_deref(),
                config.target_adapter.as_deref(),
            ) {
                Ok(id) => created.push(CreatedTask {
                    id,
                    problem_id: problem_id.clone(),
                }),
                Err(e) => {
                    warn!(problem_id, error = %e, "task creation failed");
                }
            }
        }

        if let Some(first) = created.first() {
            let _ = self.deps.db.log_activity(
                user_id,
                "create_task",
                &first.id.to_string(),
                &serde_json::json!({ "problem_ids": problem_ids, "count": created.len() }),
            );
        }
        created
    }

    // === Execution ===

    /// Run a batch in parallel on the worker pool; returns when every
    /// sub-task reaches a terminal state
    pub async fn execute_tasks(self: Arc<Self>, tasks: &[CreatedTask], config: &TaskConfig, user_id: i64) {
        let mut set: JoinSet<()> = JoinSet::new();
        for task in tasks {
            if self.is_shutting_down() || self.lock_cancelled().contains(&task.id) {
                info!(task_id = task.id, "skipping cancelled task");
                self.lock_cancelled().remove(&task.id);
                continue;
            }
            let service = self.clone();
            let config = config.clone();
            let task = task.clone();
            set.spawn(async move {
                service.run_one(task, config, user_id).await;
            });
        }
        info!(count = set.len(), "executing task batch");
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "task join error");
            }
        }
        self.write_batch_summary(user_id);
    }

    async fn run_one(self: Arc<Self>, task: CreatedTask, config: TaskConfig, user_id: i64) {
        // The pool bound applies before any work starts
        let Ok(_permit) = self.worker_slots.clone().acquire_owned().await else {
            return;
        };

        if self.is_shutting_down() || self.lock_cancelled().contains(&task.id) {
            self.finish_cancelled(task.id, user_id, &task.problem_id);
            return;
        }

        // Background batches can skip problems that already reached AC
        if !config.force {
            let workspace = self
                .deps
                .resolver
                .workspace_for(&self.deps.workspace_base, user_id, &task.problem_id);
            if workspace.is_completed() {
                info!(task_id = task.id, "skipping AC-confirmed problem");
                let _ = self.deps.db.update_task(task.id, &TaskPatch {
                    status: Some(TaskStatus::Completed),
                    stage: Some("completed".into()),
                    progress: Some(100),
                    ..Default::default()
                });
                self.deps
                    .events
                    .emitter_for(task.id, user_id, task.problem_id.clone())
                    .completed(None);
                return;
            }
        }

        let token = self.make_token(task.id);
        self.lock_running().insert(task.id, token.clone());

        let _ = self.deps.db.update_task(task.id, &TaskPatch {
            status: Some(TaskStatus::Running),
            stage: Some("running".into()),
            ..Default::default()
        });
        self.deps
            .events
            .emitter_for(task.id, user_id, task.problem_id.clone())
            .started();

        let outcome = self.run_pipeline(&task, &config, user_id, token).await;
        self.reconcile(&task, &config, user_id, outcome);

        self.lock_running().remove(&task.id);
        self.lock_cancelled().remove(&task.id);
    }

    /// Cancellation reaches the runner through both the token and this
    /// external check, so service-level cancellation (shutdown, deletion)
    /// short-circuits even mid-stage
    fn make_token(&self, task_id: i64) -> CancelToken {
        let cancelled = self.cancelled.clone();
        let shutting_down = self.shutting_down.clone();
        CancelToken::new().with_external(Arc::new(move || {
            shutting_down.load(Ordering::SeqCst)
                || cancelled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&task_id)
        }))
    }

    async fn run_pipeline(
        &self,
        task: &CreatedTask,
        config: &TaskConfig,
        user_id: i64,
        token: CancelToken,
    ) -> RunOutcome {
        let target_adapter = self.resolve_target_adapter(user_id, config);
        // Fetch adapter: task-level override, then the user's stored
        // preference, then URL auto-detection inside the runner
        let fetch_adapter = config
            .fetch_adapter_for(&task.problem_id)
            .or_else(|| self.user_fetch_preference(user_id));
        let overrides = TaskOverrides {
            fetch_adapter,
            target_adapter: Some(target_adapter),
            llm_provider: config.llm_provider.clone(),
        };
        debug!(task_id = task.id, ?overrides, "dispatching pipeline");

        let runner = PipelineRunner::new(
            self.deps.clone(),
            task.id,
            user_id,
            task.problem_id.clone(),
            config.modules(),
            overrides,
            token,
        );
        runner.run().await
    }

    /// The user's stored default fetch adapter, unless set to auto
    fn user_fetch_preference(&self, user_id: i64) -> Option<String> {
        let settings = self.deps.db.get_user_module_settings(user_id).ok()?;
        settings["fetch"]["adapter"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "auto")
            .map(String::from)
    }

    /// Upload/submit adapter: request, then the user's module settings,
    /// then the highest-priority uploader
    fn resolve_target_adapter(&self, user_id: i64, config: &TaskConfig) -> String {
        if let Some(adapter) = &config.target_adapter
            && !adapter.trim().is_empty()
        {
            return adapter.clone();
        }
        if let Ok(settings) = self.deps.db.get_user_module_settings(user_id)
            && let Some(adapter) = settings["upload"]["adapter"].as_str()
            && !adapter.trim().is_empty()
        {
            return adapter.to_string();
        }
        self.deps
            .registry
            .find_by_capability(crate::adapters::Capability::UploadData, None)
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| "hydro".to_string())
    }

    fn reconcile(&self, task: &CreatedTask, config: &TaskConfig, user_id: i64, outcome: RunOutcome) {
        let emitter = self
            .deps
            .events
            .emitter_for(task.id, user_id, task.problem_id.clone());

        if outcome.cancelled {
            self.finish_cancelled(task.id, user_id, &task.problem_id);
            return;
        }

        if outcome.success(config.modules()) {
            let _ = self.deps.db.update_task(task.id, &TaskPatch {
                status: Some(TaskStatus::Completed),
                stage: Some("completed".into()),
                progress: Some(100),
                uploaded_url: outcome.uploaded_url.clone(),
                ..Default::default()
            });
            emitter.completed(outcome.uploaded_url.as_deref());
            info!(task_id = task.id, "task completed");
        } else {
            let error = outcome.error.unwrap_or_else(|| "pipeline did not succeed".into());
            let _ = self.deps.db.update_task(task.id, &TaskPatch {
                status: Some(TaskStatus::Failed),
                stage: Some(if outcome.stage.is_empty() { "failed".into() } else { outcome.stage.clone() }),
                error_message: Some(Some(error.clone())),
                ..Default::default()
            });
            emitter.failed(&outcome.stage, &error);
            info!(task_id = task.id, error, "task failed");
        }
    }

    fn finish_cancelled(&self, task_id: i64, user_id: i64, problem_id: &str) {
        let _ = self.deps.db.update_task(task_id, &TaskPatch {
            status: Some(TaskStatus::Failed),
            stage: Some("cancelled".into()),
            error_message: Some(Some(CANCELLED_MESSAGE.into())),
            ..Default::default()
        });
        self.deps
            .events
            .emitter_for(task_id, user_id, problem_id.to_string())
            .cancelled();
        info!(task_id, "task cancelled");
    }

    /// `summary.json`, `summary.csv`, and `failed_problems.txt` for the
    /// user's most recent batch
    fn write_batch_summary(&self, user_id: i64) {
        let tasks = match self.deps.db.list_user_tasks(user_id, &TaskFilters::default()) {
            Ok(tasks) => tasks,
            Err(e) => {
                debug!(error = %e, "summary query failed");
                return;
            }
        };

        let dir = self.deps.workspace_base.join(format!("user_{user_id}"));
        let _ = std::fs::create_dir_all(&dir);

        let summary: Vec<_> = tasks
            .iter()
            .map(|t| {
                serde_json::json!({
                    "problem_id": t.problem_id,
                    "status": t.status.as_i64(),
                    "stage": t.stage,
                    "uploaded_url": t.uploaded_url,
                })
            })
            .collect();
        let _ = std::fs::write(
            dir.join("summary.json"),
            serde_json::to_string_pretty(&summary).unwrap_or_default(),
        );

        let mut csv = String::from("problem_id,status,stage,uploaded_url\n");
        for t in &tasks {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                t.problem_id,
                t.status.as_i64(),
                t.stage,
                t.uploaded_url.as_deref().unwrap_or("")
            ));
        }
        let _ = std::fs::write(dir.join("summary.csv"), csv);

        let failed: Vec<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.problem_id.as_str())
            .collect();
        if !failed.is_empty() {
            let _ = std::fs::write(dir.join("failed_problems.txt"), failed.join("\n"));
        }
    }

    // === Queries ===

    /// The row, when visible to the caller under ownership rules
    pub fn get_task(&self, task_id: i64, caller_user_id: i64, is_admin: bool) -> Option<TaskRow> {
        let task = self.deps.db.get_task(task_id).ok().flatten()?;
        if task.user_id != caller_user_id && !is_admin {
            return None;
        }
        Some(task)
    }

    pub fn get_user_tasks(&self, user_id: i64, filters: &TaskFilters) -> Vec<TaskRow> {
        self.deps.db.list_user_tasks(user_id, filters).unwrap_or_default()
    }

    /// The most recent `pipeline.log` contents, line by line
    pub fn get_task_logs(&self, task_id: i64, caller_user_id: i64, is_admin: bool) -> Vec<String> {
        let Some(task) = self.get_task(task_id, caller_user_id, is_admin) else {
            return Vec::new();
        };
        let workspace = self
            .deps
            .resolver
            .workspace_for(&self.deps.workspace_base, task.user_id, &task.problem_id);
        std::fs::read_to_string(workspace.log_path())
            .map(|content| {
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn user_stats(&self, user_id: i64) -> TaskStats {
        self.deps.db.task_stats(Some(user_id)).unwrap_or_default()
    }

    pub fn global_stats(&self) -> TaskStats {
        self.deps.db.task_stats(None).unwrap_or_default()
    }

    // === Operations ===

    /// Mark a task cancelled; the runner unwinds at its next check point
    pub fn cancel_task(&self, task_id: i64) -> bool {
        self.lock_cancelled().insert(task_id);
        if let Some(token) = self.lock_running().get(&task_id) {
            token.cancel();
            info!(task_id, "running task cancelled");
        } else {
            info!(task_id, "task marked cancelled");
        }
        true
    }

    /// Re-run the selected module(s) in place on the same row
    ///
    /// Running tasks cannot be retried, nor can a task with a retry already
    /// in flight. Admin retries execute under the original owner's
    /// configuration while the activity log records the acting admin.
    pub async fn retry_task(
        self: Arc<Self>,
        task_id: i64,
        caller_user_id: i64,
        module: &str,
        is_admin: bool,
    ) -> Option<i64> {
        let task = self.get_task(task_id, caller_user_id, is_admin)?;

        if task.status == TaskStatus::Running {
            warn!(task_id, "cannot retry a running task");
            return None;
        }
        if self.lock_running().contains_key(&task_id) {
            warn!(task_id, "retry already in flight");
            return None;
        }
        let modules = ModuleSelection::for_retry(module)?;
        let owner_id = task.user_id;

        let config = TaskConfig {
            enable_fetch: modules.fetch,
            enable_generation: modules.r#gen,
            enable_upload: modules.upload,
            enable_solve: modules.solve,
            source_adapter: task.source_judge.clone(),
            target_adapter: task.target_judge.clone(),
            problem_adapters: None,
            llm_provider: TaskConfig::default().llm_provider,
            force: true,
        };

        let _ = self.deps.db.update_task(task_id, &TaskPatch {
            status: Some(TaskStatus::Pending),
            stage: Some("retry_pending".into()),
            progress: Some(0),
            error_message: Some(None),
            ..Default::default()
        });
        let _ = self.deps.db.log_activity(
            caller_user_id,
            "retry_task",
            &task_id.to_string(),
            &serde_json::json!({
                "module": module,
                "original_user_id": owner_id,
                "retry_in_place": true,
                "is_admin_proxy": caller_user_id != owner_id,
            }),
        );
        info!(task_id, owner_id, caller_user_id, module, "retrying task in place");

        let service = self.clone();
        let created = CreatedTask {
            id: task_id,
            problem_id: task.problem_id.clone(),
        };
        tokio::spawn(async move {
            service.run_one(created, config, owner_id).await;
        });

        Some(task_id)
    }

    /// Remove the row immediately; artifact deletion runs in the
    /// background and spares AC-confirmed workspaces
    pub fn delete_task(&self, task_id: i64, caller_user_id: i64, is_admin: bool) -> bool {
        let Some(task) = self.get_task(task_id, caller_user_id, is_admin) else {
            return false;
        };
        self.cancel_task(task_id);

        if !self.deps.db.delete_task(task_id).unwrap_or(false) {
            return false;
        }
        let _ = self.deps.db.log_activity(
            caller_user_id,
            "delete_task",
            &task_id.to_string(),
            &serde_json::json!({ "problem_id": task.problem_id }),
        );

        let workspace = self
            .deps
            .resolver
            .workspace_for(&self.deps.workspace_base, task.user_id, &task.problem_id);
        tokio::spawn(async move {
            match workspace.delete_unless_completed() {
                Ok(true) => debug!(task_id, "workspace deleted"),
                Ok(false) => debug!(task_id, "workspace kept"),
                Err(e) => warn!(task_id, error = %e, "workspace deletion failed"),
            }
        });
        true
    }

    /// Stream the workspace bundle for download
    pub fn download_workspace(
        &self,
        task_id: i64,
        caller_user_id: i64,
        is_admin: bool,
        out: &std::path::Path,
    ) -> bool {
        let Some(task) = self.get_task(task_id, caller_user_id, is_admin) else {
            return false;
        };
        let workspace: Workspace = self
            .deps
            .resolver
            .workspace_for(&self.deps.workspace_base, task.user_id, &task.problem_id);
        workspace.download_bundle(out).is_ok()
    }

    /// Stop accepting work, cancel every running task, optionally drain
    pub async fn shutdown(&self, wait: bool) {
        info!("task service shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);

        let running: Vec<(i64, CancelToken)> = self
            .lock_running()
            .iter()
            .map(|(id, token)| (*id, token.clone()))
            .collect();
        for (task_id, token) in &running {
            token.cancel();
            // Terminal writes are best-effort during shutdown
            let _ = self.deps.db.update_task(*task_id, &TaskPatch {
                status: Some(TaskStatus::Failed),
                stage: Some("cancelled".into()),
                error_message: Some(Some(CANCELLED_MESSAGE.into())),
                ..Default::default()
            });
        }

        if wait {
            let deadline = std::time::Instant::now() + Duration::from_secs(30);
            while !self.lock_running().is_empty() && std::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        info!("task service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterRegistry;
    use crate::concurrency::{SemaphorePool, SubmitGate};
    use crate::events::{EventBus, EventKind};
    use crate::llm::{LlmClient, LlmError};
    use crate::pipeline::LlmFactory;
    use crate::prompts::TemplatePrompts;
    use crate::resolver::ProblemIdResolver;
    use crate::users::UserContextRegistry;
    use problemstore::{Database, SecretStore};
    use tempfile::TempDir;

    struct NoLlm;

    impl LlmFactory for NoLlm {
        fn create(&self, provider: &str, _config: &serde_json::Value) -> Result<Arc<dyn LlmClient>, LlmError> {
            Err(LlmError::MissingKey(provider.to_string()))
        }
    }

    fn deps(tmp: &TempDir) -> Arc<PipelineDeps> {
        let db = Arc::new(Database::in_memory().unwrap());
        let registry = Arc::new(AdapterRegistry::with_builtins());
        Arc::new(PipelineDeps {
            config: Arc::new(crate::config::Config::default()),
            db,
            secrets: Arc::new(SecretStore::with_key([9u8; 32])),
            events: EventBus::shared(),
            registry: registry.clone(),
            resolver: Arc::new(ProblemIdResolver::new(registry)),
            sems: Arc::new(SemaphorePool::default()),
            submit_gate: Arc::new(SubmitGate::default()),
            users: Arc::new(UserContextRegistry::new()),
            prompts: Arc::new(TemplatePrompts::embedded_only()),
            llm_factory: Arc::new(NoLlm),
            workspace_base: tmp.path().to_path_buf(),
        })
    }

    fn no_modules() -> TaskConfig {
        TaskConfig {
            enable_fetch: false,
            enable_generation: false,
            enable_upload: false,
            enable_solve: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_tasks_batch() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        let created = service.create_tasks(
            user,
            &["codeforces_1A".into(), "luogu_P1000".into()],
            &TaskConfig::default(),
        );
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].problem_id, "codeforces_1A");

        let rows = service.get_user_tasks(user, &TaskFilters::default());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_execute_empty_modules_completes() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());
        let mut rx = deps.events.subscribe();

        let config = no_modules();
        let created = service.create_tasks(user, &["codeforces_1A".into()], &config);
        service.clone().execute_tasks(&created, &config, user).await;

        let task = service.get_task(created[0].id, user, false).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.stage, "completed");
        assert_eq!(task.progress, 100);

        // started + progress... + completed, in order
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first(), Some(&EventKind::TaskStarted));
        assert_eq!(kinds.last(), Some(&EventKind::TaskCompleted));
    }

    #[tokio::test]
    async fn test_ownership_rules() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let alice = deps.db.create_user("alice", false).unwrap();
        let bob = deps.db.create_user("bob", false).unwrap();
        let service = TaskService::new(deps.clone());

        let created = service.create_tasks(alice, &["codeforces_1A".into()], &TaskConfig::default());
        let id = created[0].id;

        assert!(service.get_task(id, alice, false).is_some());
        assert!(service.get_task(id, bob, false).is_none());
        // Admins see everything
        assert!(service.get_task(id, bob, true).is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_execution() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        let config = no_modules();
        let created = service.create_tasks(user, &["codeforces_1A".into()], &config);
        service.cancel_task(created[0].id);
        service.clone().execute_tasks(&created, &config, user).await;

        // Cancelled before dispatch: the row never ran
        let task = service.get_task(created[0].id, user, false).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_retry_rules() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        let config = no_modules();
        let created = service.create_tasks(user, &["codeforces_1A".into()], &config);
        let id = created[0].id;
        service.clone().execute_tasks(&created, &config, user).await;

        // Unknown module name is rejected
        assert!(service.clone().retry_task(id, user, "bogus", false).await.is_none());

        // A running task cannot be retried
        deps.db
            .update_task(id, &TaskPatch::status(TaskStatus::Running))
            .unwrap();
        assert!(service.clone().retry_task(id, user, "all", false).await.is_none());

        deps.db
            .update_task(id, &TaskPatch::status(TaskStatus::Failed))
            .unwrap();
        let retried = service.clone().retry_task(id, user, "solve", false).await;
        // Same row is reopened, not a new one
        assert_eq!(retried, Some(id));

        // Give the spawned retry a moment to finish (no modules run)
        tokio::time::sleep(Duration::from_millis(300)).await;
        let task = service.get_task(id, user, false).unwrap();
        assert!(task.status.is_terminal());
    }

    #[tokio::test]
    async fn test_delete_task_removes_row() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        let created = service.create_tasks(user, &["codeforces_1A".into()], &TaskConfig::default());
        let id = created[0].id;

        assert!(service.delete_task(id, user, false));
        assert!(service.get_task(id, user, false).is_none());
        // Double delete reports failure
        assert!(!service.delete_task(id, user, false));
    }

    #[tokio::test]
    async fn test_shutdown_blocks_new_batches() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        service.shutdown(false).await;
        assert!(service.is_shutting_down());

        let config = no_modules();
        let created = service.create_tasks(user, &["codeforces_1A".into()], &config);
        service.clone().execute_tasks(&created, &config, user).await;
        let task = service.get_task(created[0].id, user, false).unwrap();
        // Never dispatched
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_stats() {
        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        let config = no_modules();
        let created = service.create_tasks(user, &["codeforces_1A".into(), "luogu_P1000".into()], &config);
        service.clone().execute_tasks(&created[..1], &config, user).await;

        let stats = service.user_stats(user);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_unforced_batch_skips_ac_confirmed() {
        use problemstore::{ProcessingStatus, Workspace};

        let tmp = TempDir::new().unwrap();
        let deps = deps(&tmp);
        let user = deps.db.create_user("alice", false).unwrap();
        let service = TaskService::new(deps.clone());

        // The workspace already reached AC in an earlier run
        let ws = Workspace::for_problem(&deps.workspace_base, user, "codeforces_1A");
        ws.merge_status(&ProcessingStatus {
            ok_solve: Some(true),
            ..Default::default()
        })
        .unwrap();

        // All modules enabled: actually running would fail on the absent
        // LLM factory, so completion proves the skip path was taken
        let config = TaskConfig {
            force: false,
            ..TaskConfig::default()
        };
        let created = service.create_tasks(user, &["codeforces_1A".into()], &config);
        service.clone().execute_tasks(&created, &config, user).await;

        let task = service.get_task(created[0].id, user, false).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_fetch_adapter_resolution() {
        let mut config = TaskConfig::default();
        config.source_adapter = Some("codeforces".into());
        config.problem_adapters = Some(HashMap::from([
            ("p1".to_string(), "luogu".to_string()),
            ("p2".to_string(), "auto".to_string()),
        ]));

        assert_eq!(config.fetch_adapter_for("p1").as_deref(), Some("luogu"));
        // "auto" falls back to URL detection, not the global default
        assert_eq!(config.fetch_adapter_for("p2"), None);
        assert_eq!(config.fetch_adapter_for("p3").as_deref(), Some("codeforces"));
    }
}
