//! Pipeline runner: the per-task stage state machine

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use problemstore::{ProcessingStatus, TaskPatch, Workspace};

use super::r#gen::{ensure_solution, generate_testdata};
use super::searcher::SolutionSearcher;
use super::solve::{cached_auth, solve_once};
use super::types::{ErrorClass, ModuleSelection, PipelineError, RetryEntry, RunOutcome};
use super::upload::run_upload;
use super::validate::validate_solution;
use super::{PipelineDeps, StageEnv};
use crate::adapters::{Adapter, Capability, Verdict};
use crate::concurrency::{CancelToken, interruptible_sleep, jittered};
use crate::events::LogBatcher;
use crate::llm::LlmClient;
use crate::users::UserContext;

/// Sampling floor during generation annealing
const GEN_TEMP_FLOOR: f32 = 0.1;

/// Sampling floor during solve annealing
const SOLVE_TEMP_FLOOR: f32 = 0.3;

const CANCELLED_MESSAGE: &str = "task cancelled";

/// Per-task adapter and provider choices
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    /// Fetch adapter: task-level override beats URL auto-detection
    pub fetch_adapter: Option<String>,
    /// Upload + submit adapter
    pub target_adapter: Option<String>,
    /// Single provider for both gen and solve
    pub llm_provider: String,
}

/// Executes the stages for one problem
pub struct PipelineRunner {
    deps: Arc<PipelineDeps>,
    task_id: i64,
    user_id: i64,
    original_id: String,
    modules: ModuleSelection,
    overrides: TaskOverrides,
    token: CancelToken,
}

impl PipelineRunner {
    pub fn new(
        deps: Arc<PipelineDeps>,
        task_id: i64,
        user_id: i64,
        original_id: impl Into<String>,
        modules: ModuleSelection,
        overrides: TaskOverrides,
        token: CancelToken,
    ) -> Self {
        PipelineRunner {
            deps,
            task_id,
            user_id,
            original_id: original_id.into(),
            modules,
            overrides,
            token,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Run the full state machine to a terminal outcome
    pub async fn run(self) -> RunOutcome {
        let started = Instant::now();
        let canonical = self.deps.resolver.canonicalize(&self.original_id);
        let mut outcome = RunOutcome::new(&canonical);

        let workspace = Workspace::for_problem(&self.deps.workspace_base, self.user_id, &canonical);
        if let Err(e) = workspace.ensure_exists() {
            outcome.error = Some(format!("cannot create workspace: {e}"));
            outcome.stage = "failed".into();
            return outcome;
        }

        let username = self
            .deps
            .db
            .get_user(self.user_id)
            .ok()
            .flatten()
            .map(|u| u.username)
            .unwrap_or_else(|| format!("user_{}", self.user_id));
        let user = self.deps.users.get_or_create(self.user_id, &username);
        user.increment_tasks();

        let emitter = self
            .deps
            .events
            .emitter_for(self.task_id, self.user_id, canonical.clone());
        let mut log = LogBatcher::new(emitter, workspace.log_path());

        self.run_stages(&canonical, &workspace, &user, &mut log, &mut outcome)
            .await;

        outcome.elapsed_secs = started.elapsed().as_secs_f64();

        // AC marks the artifact set reusable
        let final_status = ProcessingStatus {
            stage: Some(outcome.stage.clone()),
            ok_gen: self.modules.r#gen.then_some(outcome.ok_gen),
            ok_upload: self.modules.upload.then_some(outcome.ok_upload),
            ok_solve: self.modules.solve.then_some(outcome.ok_solve),
            elapsed: Some(outcome.elapsed_secs),
            completed_at: outcome.ok_solve.then(chrono::Utc::now),
            ..Default::default()
        };
        if let Err(e) = workspace.merge_status(&final_status) {
            warn!(task_id = self.task_id, error = %e, "final status write failed");
        }

        log.append("[SYSTEM] ========== task finished ==========");
        log.append(&format!("[SYSTEM] elapsed: {:.1}s", outcome.elapsed_secs));
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        log.append(&format!(
            "[SYSTEM] gen={} upload={} solve={}",
            mark(outcome.ok_gen),
            mark(outcome.ok_upload),
            mark(outcome.ok_solve)
        ));
        if let Some(error) = &outcome.error {
            let summary: String = error.chars().take(200).collect();
            log.append(&format!("[SYSTEM] error: {summary}"));
        }
        log.finish();

        user.decrement_tasks();
        outcome
    }

    async fn run_stages(
        &self,
        canonical: &str,
        workspace: &Workspace,
        user: &Arc<UserContext>,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) {
        log.append(&format!("[SYSTEM] ========== starting {canonical} =========="));
        log.append(&format!(
            "[SYSTEM] modules: fetch={} gen={} upload={} solve={}",
            self.modules.fetch, self.modules.r#gen, self.modules.upload, self.modules.solve
        ));
        log.append(&format!(
            "[SYSTEM] temperatures: gen={:.2} solve={:.2}, max attempts {}",
            self.deps.config.pipeline.temperature_generation,
            self.deps.config.pipeline.temperature_solution,
            self.deps.config.pipeline.max_attempts
        ));

        if self.check_cancelled(log, outcome) {
            return;
        }

        let actx = self.deps.adapter_context(self.user_id);

        // LLM client, created once when any LLM-backed stage is enabled
        let llm: Option<Arc<dyn LlmClient>> = if self.modules.r#gen || self.modules.solve {
            let llm_config = match self
                .deps
                .db
                .get_user_adapter_config(&self.deps.secrets, self.user_id, "llm")
            {
                Ok(config) => config.unwrap_or(serde_json::json!({})),
                Err(e) => {
                    outcome.error = Some(format!("cannot read LLM config: {e}"));
                    outcome.stage = "failed".into();
                    return;
                }
            };
            match self.deps.llm_factory.create(&self.overrides.llm_provider, &llm_config) {
                Ok(client) => Some(client),
                Err(e) => {
                    outcome.error = Some(format!("LLM provider unavailable: {e}"));
                    outcome.stage = "failed".into();
                    return;
                }
            }
        } else {
            None
        };

        // === Fetch ===
        if self.modules.fetch {
            self.update_stage(workspace, log, "fetch", 10);
            outcome.stage = "fetch".into();
            if !self.stage_fetch(workspace, &actx, log, outcome).await {
                return;
            }
        } else {
            log.append("[FETCH] skipped (module disabled)");
        }

        if self.check_cancelled(log, outcome) {
            return;
        }

        // === Destination pre-check: skip everything when the remote
        // already carries this title (hydro-family only) ===
        if self.modules.upload
            && let Some(adapter) = self.destination_adapter()
            && adapter.name() == "hydro"
            && self
                .precheck_destination(workspace, &actx, user, adapter.as_ref(), log, outcome)
                .await
        {
            return;
        }

        // === Gen ===
        if self.modules.r#gen {
            self.update_stage(workspace, log, "gen", 30);
            outcome.stage = "gen".into();
            let env = StageEnv {
                deps: &self.deps,
                actx: &actx,
                workspace,
                canonical_id: canonical,
                llm: llm.as_ref(),
                token: &self.token,
            };
            if !self.stage_gen(&env, log, outcome).await {
                return;
            }
        } else {
            log.append("[GEN] skipped (module disabled)");
        }

        if self.check_cancelled(log, outcome) {
            return;
        }

        // === Upload ===
        if self.modules.upload {
            self.update_stage(workspace, log, "upload", 60);
            outcome.stage = "upload".into();
            let env = StageEnv {
                deps: &self.deps,
                actx: &actx,
                workspace,
                canonical_id: canonical,
                llm: llm.as_ref(),
                token: &self.token,
            };
            self.stage_upload(&env, user, log, outcome).await;
            if outcome.cancelled {
                return;
            }
        } else {
            log.append("[UPLOAD] skipped (module disabled)");
        }

        if self.check_cancelled(log, outcome) {
            return;
        }

        // === Solve ===
        if self.modules.solve {
            self.update_stage(workspace, log, "solve", 80);
            outcome.stage = "solve".into();
            if self.modules.upload && !outcome.ok_upload {
                log.append("[SOLVE] skipped (upload failed, nothing to submit)");
            } else {
                let env = StageEnv {
                    deps: &self.deps,
                    actx: &actx,
                    workspace,
                    canonical_id: canonical,
                    llm: llm.as_ref(),
                    token: &self.token,
                };
                self.stage_solve(&env, user, log, outcome).await;
            }
            if outcome.cancelled {
                return;
            }
        } else {
            log.append("[SOLVE] skipped (module disabled)");
        }

        if outcome.error.is_none() && outcome.success(self.modules) {
            outcome.stage = "completed".into();
            self.update_stage(workspace, log, "completed", 100);
        }
    }

    /// True when the task was cancelled; fills the terminal fields
    fn check_cancelled(&self, log: &mut LogBatcher, outcome: &mut RunOutcome) -> bool {
        if outcome.cancelled {
            return true;
        }
        if self.token.is_cancelled() {
            log.append("[SYSTEM] task cancelled");
            outcome.cancelled = true;
            outcome.stage = "cancelled".into();
            outcome.error = Some(CANCELLED_MESSAGE.into());
            return true;
        }
        false
    }

    fn mark_cancelled(&self, log: &mut LogBatcher, outcome: &mut RunOutcome) {
        log.append("[SYSTEM] task cancelled");
        outcome.cancelled = true;
        outcome.stage = "cancelled".into();
        outcome.error = Some(CANCELLED_MESSAGE.into());
    }

    fn update_stage(&self, workspace: &Workspace, log: &mut LogBatcher, stage: &str, progress: u8) {
        log.set_stage(stage, progress);
        let patch = ProcessingStatus {
            stage: Some(stage.to_string()),
            ..Default::default()
        };
        if let Err(e) = workspace.merge_status(&patch) {
            debug!(error = %e, "stage status write failed");
        }
        let db_patch = TaskPatch {
            stage: Some(stage.to_string()),
            progress: Some(progress as i64),
            ..Default::default()
        };
        if let Err(e) = self.deps.db.update_task(self.task_id, &db_patch) {
            debug!(error = %e, "stage row update failed");
        }
    }

    fn destination_adapter(&self) -> Option<Arc<dyn Adapter>> {
        if let Some(name) = &self.overrides.target_adapter
            && !name.trim().is_empty()
        {
            return self.deps.registry.get(name);
        }
        self.deps.registry.find_by_capability(Capability::UploadData, None)
    }

    fn fetch_adapter(&self) -> Option<Arc<dyn Adapter>> {
        if let Some(name) = &self.overrides.fetch_adapter
            && !name.trim().is_empty()
        {
            return self.deps.registry.get(name);
        }
        self.deps.registry.find_by_url(&self.original_id)
    }

    fn searcher(&self) -> SolutionSearcher {
        SolutionSearcher::new(
            self.deps.registry.clone(),
            self.deps.config.pipeline.enable_solution_search,
        )
    }

    async fn reference_block(
        &self,
        actx: &crate::adapters::AdapterContext,
        canonical: &str,
    ) -> Option<String> {
        let (source, origin) = {
            let split = self.deps.resolver.split_canonical(canonical)?;
            (split.0.to_string(), split.1.to_string())
        };
        self.searcher().search(actx, &source, &origin).await
    }

    /// Fetch stage; returns false when the run must stop
    async fn stage_fetch(
        &self,
        workspace: &Workspace,
        actx: &crate::adapters::AdapterContext,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) -> bool {
        // Reuse whatever statement is already on disk, AC-confirmed or not;
        // re-crawling the same page adds nothing
        if let Some(existing) = workspace.load_problem()
            && !existing.title.trim().is_empty()
        {
            let kind = if workspace.is_completed() { "AC-confirmed" } else { "existing" };
            log.append(&format!("[FETCH] ✓ reusing {kind} statement: {}", existing.title));
            outcome.ok_fetch = true;
            return true;
        }

        let Some(adapter) = self.fetch_adapter() else {
            outcome.error = Some(format!("no fetch adapter recognizes `{}`", self.original_id));
            log.append("[FETCH] ✗ no adapter for this input");
            return false;
        };
        let Some(fetcher) = adapter.fetcher() else {
            outcome.error = Some(format!("{} cannot fetch problems", adapter.display_name()));
            return false;
        };

        let origin = fetcher
            .parse_problem_id(&self.original_id)
            .unwrap_or_else(|| self.original_id.clone());
        log.append(&format!(
            "[FETCH] fetching {origin} via {}...",
            adapter.display_name()
        ));

        let fetched = async {
            let _permit = self
                .deps
                .sems
                .acquire_remote_read(Duration::from_secs(120))
                .await?;
            fetcher
                .fetch_problem(actx, &origin)
                .await
                .map_err(PipelineError::from)
        }
        .await;

        match fetched {
            Ok(data) => {
                if let Err(e) = workspace.save_problem(&data) {
                    outcome.error = Some(format!("cannot save statement: {e}"));
                    return false;
                }
                let markdown = crate::prompts::statement_markdown(&data);
                let _ = std::fs::write(workspace.dir().join("problem_statement.md"), markdown);
                log.append(&format!(
                    "[FETCH] ✓ statement fetched: {} ({} samples)",
                    data.title,
                    data.samples.len()
                ));
                let _ = workspace.merge_status(&ProcessingStatus {
                    ok_fetch: Some(true),
                    ..Default::default()
                });
                outcome.ok_fetch = true;
                true
            }
            Err(PipelineError::Adapter(e)) if e.is_not_found() => {
                log.append("[FETCH] ✗ problem does not exist");
                outcome.stage = "failed(not_exist)".into();
                outcome.error = Some(e.to_string());
                false
            }
            Err(e) => {
                log.append(&format!("[FETCH] ✗ fetch failed: {e}"));
                outcome.error = Some(e.to_string());
                false
            }
        }
    }

    /// Destination title pre-check; true when the whole task short-circuits
    async fn precheck_destination(
        &self,
        workspace: &Workspace,
        actx: &crate::adapters::AdapterContext,
        user: &Arc<UserContext>,
        adapter: &dyn Adapter,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) -> bool {
        let Some(title) = workspace.load_problem().map(|p| p.title) else {
            return false;
        };
        if title.trim().is_empty() {
            return false;
        }
        let Some(uploader) = adapter.uploader() else {
            return false;
        };

        log.append("[CHECK] probing destination for an existing problem with this title...");
        let probed = match cached_auth(actx, user, adapter, log).await {
            Ok(auth) => uploader.search_exact_title(actx, &auth, &title).await,
            Err(e) => Err(crate::adapters::AdapterError::Remote(e.to_string())),
        };

        match probed {
            Ok(Some(real_id)) => {
                log.append(&format!(
                    "[CHECK] ✓ destination already has this problem (id {real_id}), skipping all stages"
                ));
                let _ = workspace.set_upload_real_id(adapter.name(), &real_id);
                outcome.ok_gen = true;
                outcome.ok_upload = true;
                outcome.ok_solve = true;
                outcome.uploaded_url = uploader.problem_url(actx, &real_id);
                if let Some(url) = &outcome.uploaded_url {
                    log.append(&format!("[CHECK] problem url: {url}"));
                }
                outcome.stage = "completed".into();
                self.update_stage(workspace, log, "completed", 100);
                true
            }
            Ok(None) => {
                log.append("[CHECK] no matching title on the destination, continuing");
                false
            }
            Err(e) => {
                // Pre-check is best-effort; the normal path follows
                log.append(&format!("[CHECK] pre-check failed ({e}), continuing"));
                false
            }
        }
    }

    /// Gen stage; returns false when the run must stop
    async fn stage_gen(
        &self,
        env: &StageEnv<'_>,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) -> bool {
        let workspace = env.workspace;
        let archive = workspace.archive_path(env.canonical_id);

        // AC-confirmed data is reused as-is
        if archive.exists() && workspace.is_completed() {
            log.append("[GEN] ✓ reusing AC-confirmed test data");
            outcome.ok_gen = true;
            return true;
        }

        let config = &self.deps.config.pipeline;
        let mut temperature = config.temperature_generation;
        let mut retry_ctx: Vec<RetryEntry> = Vec::new();

        for attempt in 1..=config.max_attempts {
            if self.token.is_cancelled() {
                self.mark_cancelled(log, outcome);
                return false;
            }
            log.append(&format!(
                "[GEN] attempt {attempt}/{} (temperature={temperature:.2})",
                config.max_attempts
            ));

            let reference = self.reference_block(env.actx, env.canonical_id).await;
            let result = generate_testdata(env, log, temperature, &retry_ctx, reference.as_deref()).await;

            match result {
                Ok(_zip) => {
                    // Solution generation rides along so validation can gate
                    // the upload; its failure alone never fails the attempt
                    if let Err(e) = ensure_solution(env, log, temperature, reference.as_deref(), false).await {
                        log.append(&format!("[GEN] solution generation failed ({e}), skipping validation"));
                    }

                    if workspace.solution_path().exists() {
                        match self.validate_under_slot(env, log).await {
                            Ok(validation) if validation.passed => {
                                log.append(&format!(
                                    "[GEN] ✓ local validation passed ({}/{})",
                                    validation.passed_cases, validation.total_cases
                                ));
                                outcome.ok_gen = true;
                                break;
                            }
                            Ok(validation) => {
                                log.append(&format!(
                                    "[GEN] ✗ local validation failed ({}/{})",
                                    validation.passed_cases, validation.total_cases
                                ));
                                for failure in validation.failures.iter().take(2) {
                                    log.append(&format!("[GEN]   {failure}"));
                                }
                                retry_ctx.push(RetryEntry {
                                    attempt,
                                    summary: format!(
                                        "local validation failed: {}/{} cases passed",
                                        validation.passed_cases, validation.total_cases
                                    ),
                                    code_snippet: std::fs::read_to_string(workspace.generator_path()).ok(),
                                    temperature,
                                });
                                let old = temperature;
                                temperature = (temperature - 0.15).max(GEN_TEMP_FLOOR);
                                log.append(&format!(
                                    "[GEN] annealing temperature {old:.2} -> {temperature:.2}"
                                ));
                                if attempt < config.max_attempts
                                    && !self
                                        .wait_or_cancel(
                                            self.validation_wait(),
                                            log,
                                            outcome,
                                        )
                                        .await
                                {
                                    return false;
                                }
                            }
                            Err(e) => {
                                // Slot timeout or compile failure counts as
                                // an attempt failure
                                log.append(&format!("[GEN] ✗ validation error: {e}"));
                                retry_ctx.push(RetryEntry {
                                    attempt,
                                    summary: e.to_string(),
                                    code_snippet: std::fs::read_to_string(workspace.solution_path()).ok(),
                                    temperature,
                                });
                                if e.is_compile_error() {
                                    let old = temperature;
                                    temperature = (temperature - 0.2).max(GEN_TEMP_FLOOR);
                                    log.append(&format!(
                                        "[GEN] compile error, annealing {old:.2} -> {temperature:.2}"
                                    ));
                                }
                                if attempt < config.max_attempts
                                    && !self
                                        .wait_or_cancel(
                                            self.retry_wait(),
                                            log,
                                            outcome,
                                        )
                                        .await
                                {
                                    return false;
                                }
                            }
                        }
                    } else {
                        log.append("[GEN] ✓ data generated (no solution, validation skipped)");
                        outcome.ok_gen = true;
                        break;
                    }
                }
                Err(PipelineError::Cancelled) => {
                    self.mark_cancelled(log, outcome);
                    return false;
                }
                Err(e) => {
                    let summary: String = e.to_string().chars().take(200).collect();
                    log.append(&format!("[GEN] ✗ attempt {attempt} failed: {summary}"));
                    retry_ctx.push(RetryEntry {
                        attempt,
                        summary,
                        code_snippet: std::fs::read_to_string(workspace.generator_path()).ok(),
                        temperature,
                    });
                    if e.is_compile_error() {
                        let old = temperature;
                        temperature = (temperature - 0.2).max(GEN_TEMP_FLOOR);
                        log.append(&format!("[GEN] compile error, annealing {old:.2} -> {temperature:.2}"));
                    }
                    if attempt < config.max_attempts {
                        if !self
                            .wait_or_cancel(
                                self.retry_wait(),
                                log,
                                outcome,
                            )
                            .await
                        {
                            return false;
                        }
                    } else {
                        log.append("[GEN] ✗ retry limit reached");
                    }
                }
            }
        }

        let _ = env.workspace.merge_status(&ProcessingStatus {
            ok_gen: Some(outcome.ok_gen),
            ..Default::default()
        });

        if !outcome.ok_gen {
            outcome.error = retry_ctx.last().map(|entry| entry.summary.clone());
            log.append("[GEN] generation failed, skipping downstream stages");
            return false;
        }
        true
    }

    async fn validate_under_slot(
        &self,
        env: &StageEnv<'_>,
        log: &mut LogBatcher,
    ) -> Result<super::validate::ValidationOutcome, PipelineError> {
        let timeout = Duration::from_secs(self.deps.config.pipeline.compile_slot_timeout_secs);
        log.append("[GEN] waiting for compile slot...");
        let _slot = self.deps.sems.acquire_compile(timeout).await?;
        let outcome = validate_solution(env.workspace, &self.deps.config.validation).await?;
        env.workspace.set_validation(&problemstore::ValidationSummary {
            passed: outcome.passed,
            total_cases: outcome.total_cases,
            passed_cases: outcome.passed_cases,
            failed_cases: outcome.failures.clone(),
        })?;
        Ok(outcome)
    }

    /// Upload stage; failures are recorded on the outcome, not returned
    async fn stage_upload(
        &self,
        env: &StageEnv<'_>,
        user: &Arc<UserContext>,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) {
        let workspace = env.workspace;
        let archive = workspace.archive_path(env.canonical_id);
        if !archive.exists() {
            log.append("[UPLOAD] skipped (no testcase archive)");
            return;
        }

        // Validation gates the upload; re-run it here when gen did not
        let validated = workspace.status().validation.map(|v| v.passed).unwrap_or(false);
        if !validated && workspace.solution_path().exists() && workspace.tests_dir().exists() {
            log.append("[UPLOAD] running last-chance validation...");
            match self.validate_under_slot(env, log).await {
                Ok(validation) if validation.passed => {
                    log.append(&format!(
                        "[UPLOAD] ✓ validation passed ({}/{})",
                        validation.passed_cases, validation.total_cases
                    ));
                }
                Ok(validation) => {
                    log.append(&format!(
                        "[UPLOAD] ✗ validation failed ({}/{}), refusing to upload",
                        validation.passed_cases, validation.total_cases
                    ));
                    outcome.error = Some("local validation failed before upload".into());
                    return;
                }
                Err(PipelineError::Slot(_)) => {
                    // A congested compile queue should not block the upload
                    log.append("[UPLOAD] compile slot timeout, continuing without validation");
                }
                Err(e) => {
                    log.append(&format!("[UPLOAD] ✗ validation error: {e}"));
                    outcome.error = Some(e.to_string());
                    return;
                }
            }
        }

        let Some(adapter) = self.destination_adapter() else {
            log.append("[UPLOAD] skipped (no destination adapter configured)");
            return;
        };

        let auth = match cached_auth(env.actx, user, adapter.as_ref(), log).await {
            Ok(auth) => auth,
            Err(e) => {
                log.append(&format!("[UPLOAD] ✗ authentication failed: {e}"));
                outcome.error = Some(e.to_string());
                return;
            }
        };

        match run_upload(env, adapter.as_ref(), &auth, &archive, log).await {
            Ok(result) => {
                outcome.ok_upload = true;
                outcome.uploaded_url = result.url;
                let _ = workspace.merge_status(&ProcessingStatus {
                    ok_upload: Some(true),
                    ..Default::default()
                });
            }
            Err(PipelineError::Cancelled) => self.mark_cancelled(log, outcome),
            Err(e) => {
                outcome.error = Some(e.to_string());
            }
        }
    }

    /// Solve stage; verdict-driven retries with temperature annealing
    async fn stage_solve(
        &self,
        env: &StageEnv<'_>,
        user: &Arc<UserContext>,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) {
        let Some(adapter) = self.destination_adapter() else {
            log.append("[SOLVE] skipped (no destination adapter configured)");
            return;
        };

        // A just-uploaded problem needs a moment before the first submit
        if self.modules.upload && outcome.ok_upload {
            let settle = jittered(Duration::from_millis(3750), Duration::from_millis(750));
            log.append(&format!(
                "[SOLVE] waiting {:.1}s for the judge to ingest the upload...",
                settle.as_secs_f64()
            ));
            if !interruptible_sleep(settle, &self.token).await {
                self.mark_cancelled(log, outcome);
                return;
            }
        }

        let config = &self.deps.config.pipeline;
        let mut temperature = config.temperature_solution;
        let mut retry_ctx: Vec<RetryEntry> = Vec::new();
        let mut force_regenerate = false;

        for attempt in 1..=config.max_attempts {
            if self.token.is_cancelled() {
                self.mark_cancelled(log, outcome);
                return;
            }
            log.append(&format!(
                "[SOLVE] attempt {attempt}/{} (temperature={temperature:.2})",
                config.max_attempts
            ));

            let reference = self.reference_block(env.actx, env.canonical_id).await;
            let result = solve_once(
                env,
                user,
                adapter.as_ref(),
                log,
                temperature,
                reference.as_deref(),
                force_regenerate,
            )
            .await;
            force_regenerate = false;

            match result {
                Ok(solved) => {
                    if solved.verdict == Verdict::Accepted {
                        log.append("[SOLVE] ✓ Accepted!");
                        outcome.ok_solve = true;
                        break;
                    }
                    log.append(&format!("[SOLVE] ✗ verdict: {}", solved.verdict.tag()));
                    if let Some(message) = &solved.error_message {
                        let summary: String = message.chars().take(200).collect();
                        log.append(&format!("[SOLVE]   {summary}"));
                    }

                    if solved.verdict == Verdict::CompileError {
                        let old = temperature;
                        temperature = (temperature - 0.2).max(SOLVE_TEMP_FLOOR);
                        force_regenerate = true;
                        log.append(&format!(
                            "[SOLVE] compile error, annealing {old:.2} -> {temperature:.2}, regenerating"
                        ));
                    }
                    retry_ctx.push(RetryEntry {
                        attempt,
                        summary: solved.verdict.tag().to_string(),
                        code_snippet: std::fs::read_to_string(env.workspace.solution_path()).ok(),
                        temperature,
                    });

                    if attempt < config.max_attempts {
                        if !self
                            .wait_or_cancel(
                                self.retry_wait(),
                                log,
                                outcome,
                            )
                            .await
                        {
                            return;
                        }
                    } else {
                        log.append("[SOLVE] ✗ retry limit reached");
                        outcome.error = Some(format!("final verdict {}", solved.verdict.tag()));
                    }
                }
                Err(PipelineError::Cancelled) => {
                    self.mark_cancelled(log, outcome);
                    return;
                }
                Err(e) => {
                    let summary: String = e.to_string().chars().take(200).collect();
                    log.append(&format!("[SOLVE] ✗ attempt {attempt} error: {summary}"));
                    retry_ctx.push(RetryEntry {
                        attempt,
                        summary: summary.clone(),
                        code_snippet: None,
                        temperature,
                    });

                    if attempt >= config.max_attempts {
                        log.append("[SOLVE] ✗ retry limit reached");
                        outcome.error = Some(summary);
                        break;
                    }

                    let wait = match e.classify() {
                        ErrorClass::AuthExpired => {
                            log.append("[SOLVE] session expired, re-authenticating next attempt");
                            user.clear_auth(adapter.name());
                            jittered(Duration::from_millis(2500), Duration::from_millis(500))
                        }
                        ErrorClass::RateLimited => {
                            log.append("[SOLVE] rate limited by the judge, backing off");
                            jittered(Duration::from_secs(75), Duration::from_secs(15))
                        }
                        ErrorClass::NotFound => {
                            log.append("[SOLVE] problem not visible yet, waiting for the judge to index");
                            jittered(Duration::from_secs(20), Duration::from_secs(5))
                        }
                        ErrorClass::Other => self.retry_wait(),
                    };
                    if !self.wait_or_cancel(wait, log, outcome).await {
                        return;
                    }
                }
            }
        }

        let _ = env.workspace.merge_status(&ProcessingStatus {
            ok_solve: Some(outcome.ok_solve),
            ..Default::default()
        });
    }

    /// Jittered base wait between failed attempts
    fn retry_wait(&self) -> Duration {
        jittered(
            Duration::from_secs(self.deps.config.pipeline.retry_wait_secs),
            Duration::from_millis(1500),
        )
    }

    /// Jittered wait after a failed local validation
    fn validation_wait(&self) -> Duration {
        jittered(
            Duration::from_secs(self.deps.config.pipeline.validation_retry_wait_secs),
            Duration::from_secs(2),
        )
    }

    /// Interruptible wait; fills the cancelled outcome on interruption
    async fn wait_or_cancel(
        &self,
        wait: Duration,
        log: &mut LogBatcher,
        outcome: &mut RunOutcome,
    ) -> bool {
        log.append(&format!("[SYSTEM] waiting {:.1}s before retry...", wait.as_secs_f64()));
        if !interruptible_sleep(wait, &self.token).await {
            self.mark_cancelled(log, outcome);
            return false;
        }
        true
    }
}
