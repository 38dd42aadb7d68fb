//! End-to-end pipeline tests over stub adapters and a scripted LLM
//!
//! These drive the real task service, runner, artifact store, and
//! concurrency primitives; only the judge and the model are scripted.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use probatch::adapters::types::{SubmissionStatus, SubmitOutcome, UploadOutcome};
use probatch::adapters::{
    Adapter, AdapterContext, AdapterError, AdapterRegistry, Capability, DataUploader, JudgeAuth,
    ProblemFetcher, SolutionSubmitter, Verdict,
};
use probatch::concurrency::{SemaphorePool, SubmitGate};
use probatch::config::Config;
use probatch::events::{EventBus, EventKind};
use probatch::llm::{ChatOutcome, ChatRequest, LlmClient, LlmError, StreamChunk};
use probatch::pipeline::{LlmFactory, PipelineDeps};
use probatch::prompts::TemplatePrompts;
use probatch::resolver::ProblemIdResolver;
use probatch::tasks::{TaskConfig, TaskService};
use probatch::users::UserContextRegistry;
use problemstore::{Database, ProblemData, Sample, SecretStore, TaskStatus, Workspace};
use tempfile::TempDir;

// === Scripted judge ===

#[derive(Default)]
struct JudgeState {
    /// Scripted verdicts, consumed per submission
    verdicts: VecDeque<Verdict>,
    /// Wall-clock times of submit RPCs
    submit_times: Vec<Instant>,
    /// Tokens that performed each submit, for isolation checks
    submit_tokens: Vec<String>,
    auth_count: usize,
    /// Errors to throw on submit before anything succeeds
    submit_errors: VecDeque<AdapterError>,
    /// Title hit for the destination pre-check
    known_title: Option<(String, String)>,
}

#[derive(Clone)]
struct StubJudge {
    name: &'static str,
    state: Arc<Mutex<JudgeState>>,
}

impl StubJudge {
    fn new(name: &'static str) -> Self {
        StubJudge {
            name,
            state: Arc::new(Mutex::new(JudgeState {
                verdicts: VecDeque::from([Verdict::Accepted]),
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, JudgeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Adapter for StubJudge {
    fn name(&self) -> &'static str {
        self.name
    }
    fn display_name(&self) -> &'static str {
        "Stub judge"
    }
    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::FetchProblem,
            Capability::UploadData,
            Capability::SubmitSolution,
        ]
    }
    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        Some(self)
    }
    fn uploader(&self) -> Option<&dyn DataUploader> {
        Some(self)
    }
    fn submitter(&self) -> Option<&dyn SolutionSubmitter> {
        Some(self)
    }

    async fn authenticate(&self, ctx: &AdapterContext) -> Result<JudgeAuth, AdapterError> {
        let mut state = self.state();
        state.auth_count += 1;
        let mut auth = JudgeAuth::anonymous()?;
        auth.token = format!("token-u{}-n{}", ctx.user_id, state.auth_count);
        Ok(auth)
    }
}

#[async_trait]
impl ProblemFetcher for StubJudge {
    fn supports_url(&self, url: &str) -> bool {
        !url.is_empty() && url.chars().all(|c| c.is_ascii_digit())
    }

    fn parse_problem_id(&self, input: &str) -> Option<String> {
        ProblemFetcher::supports_url(self, input).then(|| input.to_string())
    }

    async fn fetch_problem(&self, _ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError> {
        if origin_id == "404" {
            return Err(AdapterError::NotFound("no such problem".into()));
        }
        Ok(ProblemData {
            id: format!("{}_{origin_id}", self.name),
            source: self.name.to_string(),
            title: format!("Stub Problem {origin_id}"),
            description: "Print 1.".into(),
            input_format: "Nothing.".into(),
            output_format: "One integer.".into(),
            samples: vec![
                Sample {
                    input: "1\n".into(),
                    output: "1\n".into(),
                },
                Sample {
                    input: "1\n".into(),
                    output: "1\n".into(),
                },
            ],
            ..Default::default()
        })
    }
}

#[async_trait]
impl DataUploader for StubJudge {
    async fn upload_testcases(
        &self,
        _ctx: &AdapterContext,
        _auth: &JudgeAuth,
        _problem_id: &str,
        archive: &Path,
        _skip_update: bool,
    ) -> Result<UploadOutcome, AdapterError> {
        assert!(archive.exists(), "archive must exist at upload time");
        Ok(UploadOutcome {
            ok: true,
            created: true,
            raw: serde_json::json!({ "real_id": "R1", "response": { "code": 0 } }),
        })
    }

    async fn search_exact_title(
        &self,
        _ctx: &AdapterContext,
        _auth: &JudgeAuth,
        title: &str,
    ) -> Result<Option<String>, AdapterError> {
        let state = self.state();
        Ok(state
            .known_title
            .as_ref()
            .filter(|(known, _)| known == title)
            .map(|(_, pid)| pid.clone()))
    }

    fn problem_url(&self, _ctx: &AdapterContext, real_id: &str) -> Option<String> {
        Some(format!("https://judgeb.example/p/{real_id}"))
    }
}

#[async_trait]
impl SolutionSubmitter for StubJudge {
    async fn submit_solution(
        &self,
        _ctx: &AdapterContext,
        auth: &JudgeAuth,
        _problem_id: &str,
        code: &str,
        _language_key: &str,
    ) -> Result<SubmitOutcome, AdapterError> {
        assert!(code.len() >= 50, "submitted code is too short");
        let mut state = self.state();
        if let Some(error) = state.submit_errors.pop_front() {
            return Err(error);
        }
        state.submit_times.push(Instant::now());
        state.submit_tokens.push(auth.token.clone());
        let n = state.submit_times.len();
        Ok(SubmitOutcome {
            submission_id: format!("S{n}"),
            record_url: Some(format!("https://judgeb.example/record/S{n}")),
            message: "submitted".into(),
        })
    }

    async fn submission_status(
        &self,
        _ctx: &AdapterContext,
        _auth: &JudgeAuth,
        _submission_id: &str,
    ) -> Result<SubmissionStatus, AdapterError> {
        let mut state = self.state();
        let verdict = state.verdicts.pop_front().unwrap_or(Verdict::Accepted);
        Ok(SubmissionStatus {
            verdict,
            score: None,
            error_message: Some("compiler said no".into()),
            raw: serde_json::json!({}),
        })
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["cpp".into()]
    }

    fn default_language(&self, _hint: &str) -> String {
        "cpp".into()
    }
}

// === Scripted LLM ===

/// Generator script in shell, run with `generator_command = ["sh"]`
const GEN_SCRIPT: &str = r#"```python
# write the full fixed test set
mkdir -p tests
for i in 0 1 2 3 4 5 6 7 8 9; do
  printf '1\n' > "tests/$i.in"
  printf '1\n' > "tests/$i.out"
done
echo generated
```"#;

const SOLUTION_CODE: &str = r#"```cpp
#include <cstdio>
int main() {
    // the answer is always one
    std::puts("1");
    return 0;
}
```"#;

#[derive(Default)]
struct LlmLog {
    gen_calls: usize,
    solution_calls: usize,
    solution_temperatures: Vec<f32>,
}

struct ScriptedLlm {
    log: Arc<Mutex<LlmLog>>,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model_name(&self) -> String {
        "scripted-1".into()
    }

    async fn chat_completion(
        &self,
        request: ChatRequest,
        chunks: Option<mpsc::Sender<StreamChunk>>,
    ) -> Result<ChatOutcome, LlmError> {
        let is_generation = request.prompt.contains("tests/0.in");
        let content = if is_generation { GEN_SCRIPT } else { SOLUTION_CODE };
        {
            let mut log = self.log.lock().unwrap();
            if is_generation {
                log.gen_calls += 1;
            } else {
                log.solution_calls += 1;
                log.solution_temperatures.push(request.temperature);
            }
        }
        if let Some(tx) = chunks {
            let _ = tx.send(StreamChunk::Reasoning("thinking it through\n".into())).await;
            let _ = tx.send(StreamChunk::Content(content.to_string())).await;
        }
        Ok(ChatOutcome {
            content: content.to_string(),
            reasoning: Some("thinking it through".into()),
        })
    }
}

struct ScriptedFactory {
    log: Arc<Mutex<LlmLog>>,
}

impl LlmFactory for ScriptedFactory {
    fn create(&self, _provider: &str, _config: &serde_json::Value) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::new(ScriptedLlm { log: self.log.clone() }))
    }
}

// === Harness ===

struct Harness {
    _tmp: TempDir,
    deps: Arc<PipelineDeps>,
    service: Arc<TaskService>,
    judge: StubJudge,
    llm_log: Arc<Mutex<LlmLog>>,
}

fn harness_with_judge(judge: StubJudge) -> Harness {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::in_memory().unwrap());

    let mut registry = AdapterRegistry::with_builtins();
    registry.register(Arc::new(judge.clone()));
    let registry = Arc::new(registry);

    let mut config = Config::default();
    config.pipeline.generator_command = vec!["sh".into()];
    config.validation.compile_command = vec!["true".into()];
    config.validation.run_command = vec!["cat".into()];
    config.concurrency.min_submit_interval_ms = 300;

    let llm_log = Arc::new(Mutex::new(LlmLog::default()));
    let deps = Arc::new(PipelineDeps {
        config: Arc::new(config),
        db,
        secrets: Arc::new(SecretStore::with_key([3u8; 32])),
        events: EventBus::shared(),
        registry: registry.clone(),
        resolver: Arc::new(ProblemIdResolver::new(registry)),
        sems: Arc::new(SemaphorePool::default()),
        submit_gate: Arc::new(SubmitGate::new(Duration::from_millis(300))),
        users: Arc::new(UserContextRegistry::new()),
        prompts: Arc::new(TemplatePrompts::embedded_only()),
        llm_factory: Arc::new(ScriptedFactory { log: llm_log.clone() }),
        workspace_base: tmp.path().to_path_buf(),
    });
    let service = TaskService::new(deps.clone());

    Harness {
        _tmp: tmp,
        deps,
        service,
        judge,
        llm_log,
    }
}

fn harness() -> Harness {
    harness_with_judge(StubJudge::new("stubjudge"))
}

fn full_config() -> TaskConfig {
    TaskConfig {
        source_adapter: Some("stubjudge".into()),
        target_adapter: Some("stubjudge".into()),
        llm_provider: "scripted".into(),
        ..Default::default()
    }
}

fn solve_only_config() -> TaskConfig {
    TaskConfig {
        enable_fetch: false,
        enable_generation: false,
        enable_upload: false,
        enable_solve: true,
        ..full_config()
    }
}

impl Harness {
    fn create_user(&self, name: &str) -> i64 {
        self.deps.db.create_user(name, false).unwrap()
    }

    fn workspace(&self, user_id: i64, canonical: &str) -> Workspace {
        Workspace::for_problem(&self.deps.workspace_base, user_id, canonical)
    }

    /// Seed a workspace as if fetch + upload already ran
    fn seed_uploaded(&self, user_id: i64, origin: &str) -> Workspace {
        let canonical = format!("stubjudge_{origin}");
        let ws = self.workspace(user_id, &canonical);
        ws.save_problem(&ProblemData {
            id: canonical.clone(),
            source: "stubjudge".into(),
            title: format!("Stub Problem {origin}"),
            description: "Print 1.".into(),
            ..Default::default()
        })
        .unwrap();
        ws.set_upload_real_id("stubjudge", "R1").unwrap();
        ws
    }
}

// === Scenario S1: happy path across all four stages ===

#[tokio::test]
async fn test_happy_path_full_pipeline() {
    let h = harness();
    let user = h.create_user("alice");
    let config = full_config();
    let mut rx = h.deps.events.subscribe();

    let created = h.service.create_tasks(user, &["1234".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    // Task row reached completed with the public URL
    let task = h.service.get_task(created[0].id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.stage, "completed");
    assert_eq!(task.progress, 100);
    assert_eq!(task.uploaded_url.as_deref(), Some("https://judgeb.example/p/R1"));

    // Artifact set on disk
    let ws = h.workspace(user, "stubjudge_1234");
    assert!(ws.load_problem().is_some());
    assert!(ws.generator_path().exists());
    assert!(ws.solution_path().exists());
    assert!(ws.archive_path("stubjudge_1234").exists());
    assert!(ws.log_path().exists());
    for i in 0..10 {
        let input = std::fs::read_to_string(ws.tests_dir().join(format!("{i}.in"))).unwrap();
        assert_eq!(input, "1\n");
    }

    // processing_status records every stage and the remote id
    let status = ws.status();
    assert_eq!(status.ok_gen, Some(true));
    assert_eq!(status.ok_upload, Some(true));
    assert_eq!(status.ok_solve, Some(true));
    assert!(status.is_completed());
    assert_eq!(ws.upload_real_id("stubjudge").as_deref(), Some("R1"));
    assert!(status.validation.unwrap().passed);

    // Events arrive in lifecycle order
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&EventKind::TaskStarted));
    assert_eq!(kinds.last(), Some(&EventKind::TaskCompleted));
    assert!(kinds.contains(&EventKind::TaskProgress));

    // One generation, one solution; solve reused the gen-stage solution
    let log = h.llm_log.lock().unwrap();
    assert_eq!(log.gen_calls, 1);
    assert_eq!(log.solution_calls, 1);
}

// === Fetch failure: 404 terminates without retries ===

#[tokio::test]
async fn test_fetch_not_found_terminates() {
    let h = harness();
    let user = h.create_user("alice");
    let config = full_config();

    let created = h.service.create_tasks(user, &["404".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let task = h.service.get_task(created[0].id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.stage, "failed(not_exist)");
    // No generation was attempted
    assert_eq!(h.llm_log.lock().unwrap().gen_calls, 0);
}

// === Scenario S2: compile errors anneal the temperature ===

#[tokio::test]
async fn test_compile_error_annealing() {
    let h = harness();
    let user = h.create_user("alice");
    h.seed_uploaded(user, "77");
    h.judge.state().verdicts = VecDeque::from([Verdict::CompileError, Verdict::Accepted]);

    // Raise the solve temperature so annealing is observable above the
    // floor, and drop the retry wait so the test stays fast
    let mut config = Config::default();
    config.pipeline.temperature_solution = 0.7;
    config.pipeline.retry_wait_secs = 0;
    config.pipeline.generator_command = vec!["sh".into()];
    config.validation.compile_command = vec!["true".into()];
    config.validation.run_command = vec!["cat".into()];
    let deps = Arc::new(PipelineDeps {
        config: Arc::new(config),
        db: h.deps.db.clone(),
        secrets: h.deps.secrets.clone(),
        events: h.deps.events.clone(),
        registry: h.deps.registry.clone(),
        resolver: h.deps.resolver.clone(),
        sems: h.deps.sems.clone(),
        submit_gate: h.deps.submit_gate.clone(),
        users: h.deps.users.clone(),
        prompts: h.deps.prompts.clone(),
        llm_factory: h.deps.llm_factory.clone(),
        workspace_base: h.deps.workspace_base.clone(),
    });
    let service = TaskService::new(deps);

    let config = solve_only_config();
    let created = service.create_tasks(user, &["77".into()], &config);
    service.clone().execute_tasks(&created, &config, user).await;

    let task = service.get_task(created[0].id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let log = h.llm_log.lock().unwrap();
    // First attempt generated at 0.7, CE forced a regeneration at 0.5
    assert_eq!(log.solution_temperatures, vec![0.7, 0.5]);
    assert_eq!(h.judge.state().submit_times.len(), 2);
}

// === Scenario S3: destination already has the title ===

#[tokio::test]
async fn test_title_short_circuit_on_hydro_family() {
    // The short-circuit is gated to the hydro family, so the stub
    // registers under that name, replacing the builtin
    let h = harness_with_judge(StubJudge::new("hydro"));
    let user = h.create_user("alice");
    h.judge.state().known_title = Some(("Stub Problem 1234".into(), "P42".into()));

    let config = TaskConfig {
        source_adapter: Some("hydro".into()),
        target_adapter: Some("hydro".into()),
        llm_provider: "scripted".into(),
        ..Default::default()
    };
    let created = h.service.create_tasks(user, &["1234".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let task = h.service.get_task(created[0].id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.uploaded_url.as_deref(), Some("https://judgeb.example/p/P42"));

    // All stages were skipped: no LLM call, no submit, real_id persisted
    assert_eq!(h.llm_log.lock().unwrap().gen_calls, 0);
    assert_eq!(h.judge.state().submit_times.len(), 0);
    let ws = h.workspace(user, "hydro_1234");
    assert_eq!(ws.upload_real_id("hydro").as_deref(), Some("P42"));
    let status = ws.status();
    assert_eq!(status.ok_gen, Some(true));
    assert_eq!(status.ok_solve, Some(true));
}

// === Scenario S4: cancellation unwinds quickly ===

#[tokio::test]
async fn test_cancellation_mid_run() {
    let h = harness();
    let user = h.create_user("alice");
    // Every submission fails with a plain error, pushing the runner into
    // its 30 s retry sleep where cancellation must interrupt it
    h.judge.state().submit_errors = VecDeque::from([
        AdapterError::Remote("flaky".into()),
        AdapterError::Remote("flaky".into()),
        AdapterError::Remote("flaky".into()),
    ]);
    h.seed_uploaded(user, "55");

    let config = solve_only_config();
    let created = h.service.create_tasks(user, &["55".into()], &config);
    let task_id = created[0].id;

    let service = h.service.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        service.cancel_task(task_id);
    });

    let started = Instant::now();
    h.service.clone().execute_tasks(&created, &config, user).await;
    canceller.await.unwrap();

    let task = h.service.get_task(task_id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.stage, "cancelled");
    assert_eq!(task.error_message.as_deref(), Some("task cancelled"));
    // Far inside the 35 s liveness bound
    assert!(started.elapsed() < Duration::from_secs(10));
}

// === Scenario S5: auth expiry mid-solve ===

#[tokio::test]
async fn test_auth_expired_reauthenticates() {
    let h = harness();
    let user = h.create_user("alice");
    h.seed_uploaded(user, "88");
    h.judge.state().submit_errors = VecDeque::from([AdapterError::AuthExpired("session gone".into())]);

    let config = solve_only_config();
    let created = h.service.create_tasks(user, &["88".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let task = h.service.get_task(created[0].id, user, false).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let state = h.judge.state();
    // Initial login plus one re-authentication after the 401
    assert_eq!(state.auth_count, 2);
    // The successful submit used the fresh session
    assert_eq!(state.submit_tokens.last().unwrap(), &format!("token-u{user}-n2"));
}

// === Scenario S6: concurrent submissions are rate-spaced and isolated ===

#[tokio::test]
async fn test_concurrent_submits_spaced_and_isolated() {
    let h = harness();
    let alice = h.create_user("alice");
    let bob = h.create_user("bob");
    h.seed_uploaded(alice, "91");
    h.seed_uploaded(bob, "92");
    h.judge.state().verdicts = VecDeque::from([Verdict::Accepted, Verdict::Accepted]);

    let config = solve_only_config();
    let task_a = h.service.create_tasks(alice, &["91".into()], &config);
    let task_b = h.service.create_tasks(bob, &["92".into()], &config);

    let (r1, r2) = tokio::join!(
        h.service.clone().execute_tasks(&task_a, &config, alice),
        h.service.clone().execute_tasks(&task_b, &config, bob),
    );
    let _ = (r1, r2);

    assert_eq!(
        h.service.get_task(task_a[0].id, alice, false).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        h.service.get_task(task_b[0].id, bob, false).unwrap().status,
        TaskStatus::Completed
    );

    let state = h.judge.state();
    assert_eq!(state.submit_times.len(), 2);
    let gap = state.submit_times[1].duration_since(state.submit_times[0]);
    assert!(gap >= Duration::from_millis(290), "submits only {gap:?} apart");

    // No cookie leaked between user contexts: one auth per user, never shared
    assert_eq!(state.auth_count, 2);
    let tokens: std::collections::HashSet<_> = state.submit_tokens.iter().collect();
    assert_eq!(tokens.len(), 2);
}

// === Same-user tasks share one cached auth ===

#[tokio::test]
async fn test_same_user_tasks_share_auth() {
    let h = harness();
    let alice = h.create_user("alice");
    h.seed_uploaded(alice, "61");
    h.seed_uploaded(alice, "62");
    h.judge.state().verdicts = VecDeque::from([Verdict::Accepted, Verdict::Accepted]);

    let config = solve_only_config();
    let created = h
        .service
        .create_tasks(alice, &["61".into(), "62".into()], &config);
    h.service.clone().execute_tasks(&created, &config, alice).await;

    for task in &created {
        assert_eq!(
            h.service.get_task(task.id, alice, false).unwrap().status,
            TaskStatus::Completed
        );
    }
    // Exactly one login: the second task reused the cached session
    assert_eq!(h.judge.state().auth_count, 1);
}

// === Retry reuses the workspace and reopens the same row ===

#[tokio::test]
async fn test_retry_solve_in_place() {
    let h = harness();
    let user = h.create_user("alice");
    h.seed_uploaded(user, "70");
    h.judge.state().verdicts = VecDeque::from([Verdict::Accepted]);

    let config = solve_only_config();
    let created = h.service.create_tasks(user, &["70".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;
    let id = created[0].id;
    assert_eq!(h.service.get_task(id, user, false).unwrap().status, TaskStatus::Completed);

    // Completed rows can be retried in place
    h.judge.state().verdicts = VecDeque::from([Verdict::Accepted]);
    let retried = h.service.clone().retry_task(id, user, "solve", false).await;
    assert_eq!(retried, Some(id));

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let task = h.service.get_task(id, user, false).unwrap();
        if task.status.is_terminal() {
            assert_eq!(task.status, TaskStatus::Completed);
            break;
        }
        assert!(Instant::now() < deadline, "retry never finished");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // The workspace survived the retry
    let ws = h.workspace(user, "stubjudge_70");
    assert!(ws.load_problem().is_some());
}

// === Deleting a non-AC task clears the workspace, AC is preserved ===

#[tokio::test]
async fn test_delete_preserves_ac_workspace() {
    let h = harness();
    let user = h.create_user("alice");
    let config = full_config();

    let created = h.service.create_tasks(user, &["1234".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;
    let ws = h.workspace(user, "stubjudge_1234");
    assert!(ws.is_completed());

    assert!(h.service.delete_task(created[0].id, user, false));
    tokio::time::sleep(Duration::from_millis(200)).await;
    // AC-confirmed artifacts survive deletion
    assert!(ws.dir().exists());
}

// === Task logs surface the pipeline log ===

#[tokio::test]
async fn test_task_logs_readable() {
    let h = harness();
    let user = h.create_user("alice");
    let config = full_config();

    let created = h.service.create_tasks(user, &["1234".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let logs = h.service.get_task_logs(created[0].id, user, false);
    assert!(!logs.is_empty());
    let joined = logs.join("\n");
    assert!(joined.contains("[FETCH]"));
    assert!(joined.contains("[GEN]"));
    assert!(joined.contains("[UPLOAD]"));
    assert!(joined.contains("[SOLVE]"));
    assert!(joined.contains("task finished"));

    // Other users cannot read them
    let bob = h.create_user("bob");
    assert!(h.service.get_task_logs(created[0].id, bob, false).is_empty());
}

// === Workspace download bundle ===

#[tokio::test]
async fn test_download_bundle_contents() {
    let h = harness();
    let user = h.create_user("alice");
    let config = full_config();

    let created = h.service.create_tasks(user, &["1234".into()], &config);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let out = h._tmp.path().join("bundle.zip");
    assert!(h.service.download_workspace(created[0].id, user, false, &out));

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
    assert!(zip.by_name("problem_data.json").is_ok());
    assert!(zip.by_name("problem_statement.md").is_ok());
    assert!(zip.by_name("solution.cpp").is_ok());
    assert!(zip.by_name("tests/0.in").is_ok());
    assert!(zip.by_name("tests/9.out").is_ok());
}

// === Worker pool stays bounded ===

#[tokio::test]
async fn test_worker_pool_bound() {
    let h = harness();
    let user = h.create_user("alice");
    // All stages disabled: tasks flow through the pool doing nothing
    let config = TaskConfig {
        enable_fetch: false,
        enable_generation: false,
        enable_upload: false,
        enable_solve: false,
        ..full_config()
    };

    let problems: Vec<String> = (0..20).map(|i| format!("{}", 3000 + i)).collect();
    let created = h.service.create_tasks(user, &problems, &config);
    assert_eq!(created.len(), 20);
    h.service.clone().execute_tasks(&created, &config, user).await;

    let done = h
        .service
        .get_user_tasks(user, &Default::default())
        .into_iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    assert_eq!(done, 20);
}

