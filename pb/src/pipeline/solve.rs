//! Solve stage: submit the solution to the destination judge and poll the
//! verdict
//!
//! The submit RPC and the wait for the first poll happen under the global
//! submit gate, so concurrent tasks never hammer the same judge faster
//! than the minimum interval allows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::StageEnv;
use super::r#gen::ensure_solution;
use super::types::PipelineError;
use crate::adapters::{Adapter, AdapterError, JudgeAuth, Verdict};
use crate::concurrency::{interruptible_sleep, jittered};
use crate::events::LogBatcher;
use crate::users::UserContext;

const WRITE_SLOT_TIMEOUT: Duration = Duration::from_secs(300);

/// CE with no compiler output on the first polls usually means the judge
/// is still ingesting; keep polling
const CE_GRACE_POLLS: u32 = 2;

#[derive(Debug, Clone)]
pub(super) struct SolveAttempt {
    pub verdict: Verdict,
    pub submission_id: String,
    pub error_message: Option<String>,
}

/// The cached session for this adapter, authenticating on a miss
///
/// Login is single-flighted per user: concurrent tasks that miss the cache
/// together still end up sharing one session.
pub(super) async fn cached_auth(
    actx: &crate::adapters::AdapterContext,
    user: &Arc<UserContext>,
    adapter: &dyn Adapter,
    log: &mut LogBatcher,
) -> Result<JudgeAuth, PipelineError> {
    if let Some(auth) = user.get_auth(adapter.name()) {
        debug!(adapter = adapter.name(), "using cached auth");
        return Ok(auth);
    }

    let _guard = user.login_guard().await;
    // Another task may have logged in while we waited
    if let Some(auth) = user.get_auth(adapter.name()) {
        return Ok(auth);
    }
    log.append(&format!("[AUTH] logging in to {}...", adapter.display_name()));
    let auth = adapter.authenticate(actx).await?;
    user.set_auth(adapter.name(), auth.clone());
    log.append("[AUTH] login ok, session cached");
    Ok(auth)
}

/// Resolve the destination problem id: cached from upload first, exact
/// title search second
pub(super) async fn resolve_real_id(
    env: &StageEnv<'_>,
    adapter: &dyn Adapter,
    auth: &JudgeAuth,
    log: &mut LogBatcher,
) -> Result<String, PipelineError> {
    if let Some(real_id) = env.workspace.upload_real_id(adapter.name()) {
        return Ok(real_id);
    }

    // The upload may have run in an earlier task; try to find the problem
    // on the destination before giving up
    if let Some(uploader) = adapter.uploader()
        && let Some(problem) = env.workspace.load_problem()
        && !problem.title.trim().is_empty()
    {
        log.append("[SOLVE] no cached remote id, searching destination by title...");
        if let Some(found) = uploader.search_exact_title(env.actx, auth, &problem.title).await? {
            env.workspace.set_upload_real_id(adapter.name(), &found)?;
            log.append(&format!("[SOLVE] ✓ found remote problem {found} by title"));
            return Ok(found);
        }
    }

    Err(PipelineError::Adapter(AdapterError::NotFound(format!(
        "problem not uploaded to {} yet; enable the upload module first",
        adapter.display_name()
    ))))
}

/// One solve attempt: ensure code, submit, poll to a final verdict
pub(super) async fn solve_once(
    env: &StageEnv<'_>,
    user: &Arc<UserContext>,
    adapter: &dyn Adapter,
    log: &mut LogBatcher,
    temperature: f32,
    reference: Option<&str>,
    force_regenerate: bool,
) -> Result<SolveAttempt, PipelineError> {
    let submitter = adapter.submitter().ok_or(AdapterError::Unsupported {
        adapter: adapter.name(),
        operation: "submit_solution",
    })?;

    let auth = cached_auth(env.actx, user, adapter, log).await?;
    let real_id = resolve_real_id(env, adapter, &auth, log).await?;

    let reuse = env.deps.config.pipeline.solve_reuse_existing && !force_regenerate;
    ensure_solution(env, log, temperature, reference, !reuse).await?;
    let code = std::fs::read_to_string(env.workspace.solution_path())
        .map_err(|e| PipelineError::Generator(format!("cannot read solution: {e}")))?;

    let language = submitter.default_language("C++");

    // Submission is serialized process-wide; the gate is held over the
    // submit RPC and the wait for the first poll
    let _write_permit = env.deps.sems.acquire_remote_write(WRITE_SLOT_TIMEOUT).await?;
    let mut gate = env.deps.submit_gate.acquire().await;

    log.append(&format!("[SOLVE] submitting to {} as {language}", adapter.display_name()));
    let submit = submitter
        .submit_solution(env.actx, &auth, &real_id, &code, &language)
        .await?;
    gate.mark_submitted();
    log.append(&format!("[SOLVE] ✓ submitted, record {}", submit.submission_id));
    if let Some(url) = &submit.record_url {
        log.append(&format!("[SOLVE] record url: {url}"));
    }

    // Let the judge ingest before the first poll, still holding the gate
    if !interruptible_sleep(jittered(Duration::from_millis(2500), Duration::from_millis(500)), env.token).await {
        return Err(PipelineError::Cancelled);
    }

    let mut poll_count: u32 = 1;
    let mut status = submitter
        .submission_status(env.actx, &auth, &submit.submission_id)
        .await?;
    drop(gate);
    drop(_write_permit);

    let poll_interval = Duration::from_secs(env.deps.config.pipeline.poll_interval_secs);
    let deadline = Instant::now() + Duration::from_secs(env.deps.config.pipeline.poll_deadline_secs);

    loop {
        log.append(&format!("[SOLVE] poll {poll_count}: {}", status.verdict.tag()));

        let still_ingesting = status.verdict == Verdict::CompileError
            && status.error_message.as_deref().unwrap_or("").is_empty()
            && poll_count <= CE_GRACE_POLLS;

        if status.verdict.is_final() && !still_ingesting {
            break;
        }
        if Instant::now() >= deadline {
            log.append("[SOLVE] ✗ verdict polling timed out");
            break;
        }
        if !interruptible_sleep(poll_interval, env.token).await {
            return Err(PipelineError::Cancelled);
        }

        let _read_permit = env
            .deps
            .sems
            .acquire_remote_read(WRITE_SLOT_TIMEOUT)
            .await?;
        status = submitter
            .submission_status(env.actx, &auth, &submit.submission_id)
            .await?;
        poll_count += 1;
    }

    let result_json = serde_json::json!({
        "submission_id": submit.submission_id,
        "verdict": status.verdict.tag(),
        "score": status.score,
        "record_url": submit.record_url,
        "raw": status.raw,
    });
    let _ = std::fs::write(
        env.workspace.dir().join("solve_result.json"),
        serde_json::to_string_pretty(&result_json).unwrap_or_default(),
    );

    Ok(SolveAttempt {
        verdict: status.verdict,
        submission_id: submit.submission_id,
        error_message: status.error_message,
    })
}
