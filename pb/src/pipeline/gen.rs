//! Gen stage: prompt the model for a generator script, execute it, and
//! package the produced tests

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use problemstore::ProblemData;
use problemstore::sanitize_filename;

use super::StageEnv;
use super::chat::{blocking_chat, stream_chat};
use super::types::{PipelineError, RetryEntry, render_retry_context};
use crate::events::LogBatcher;
use crate::llm::ChatRequest;
use crate::prompts::{
    check_generator_syntax, extract_code_block, sanitize_generator_code, sanitize_solution_code,
    statement_markdown,
};

/// Judges reject submissions shorter than this; generated code under the
/// limit is treated as a failed generation
pub(super) const MIN_CODE_LEN: usize = 50;

const MIN_GENERATOR_LEN: usize = 100;

/// Build the generation prompt: statement, optional reference solutions,
/// retry history, then the task instructions
fn build_gen_prompt(
    env: &StageEnv<'_>,
    problem: &ProblemData,
    retry_ctx: &[RetryEntry],
    reference: Option<&str>,
) -> String {
    let mut statement = statement_markdown(problem);
    if let Some(reference) = reference {
        statement.push_str(reference);
    }
    statement.push_str(&render_retry_context(retry_ctx));

    let instructions = env.deps.prompts.generation_task_instructions(env.canonical_id);
    format!("**Problem**\n\n{statement}\n\n---\n\n{instructions}")
}

/// One generation attempt: LLM call, syntax gate, subprocess execution,
/// normalization, completeness check, archive
pub(super) async fn generate_testdata(
    env: &StageEnv<'_>,
    log: &mut LogBatcher,
    temperature: f32,
    retry_ctx: &[RetryEntry],
    reference: Option<&str>,
) -> Result<PathBuf, PipelineError> {
    let workspace = env.workspace;
    let problem = workspace
        .load_problem()
        .ok_or_else(|| PipelineError::Generator("no statement saved; run fetch first".into()))?;

    // A re-entry never mixes files from two generations
    workspace.clear_generated(env.canonical_id)?;

    let prompt = build_gen_prompt(env, &problem, retry_ctx, reference);
    let _ = std::fs::write(workspace.dir().join("problem_statement.txt"), &prompt);
    let _ = std::fs::write(workspace.dir().join("prompt.txt"), &prompt);
    log.append(&format!("[GEN] prompt built ({} chars)", prompt.len()));

    let llm = env.llm()?;
    let request = ChatRequest::new(prompt)
        .with_system(env.deps.prompts.generation_system_prompt())
        .with_temperature(temperature);

    log.append(&format!(
        "[GEN] calling {} (temperature={temperature:.2})",
        llm.provider_name()
    ));
    let outcome = stream_chat(
        env.deps,
        llm,
        request,
        log,
        &workspace.dir().join("problem.log"),
    )
    .await?;
    log.append(&format!("[GEN] response received ({} chars)", outcome.content.len()));

    let archive_name = format!("problem_{}_testcase.zip", sanitize_filename(env.canonical_id));
    let mut code = sanitize_generator_code(&outcome.content, &archive_name)
        .ok_or_else(|| PipelineError::EmptyCode("no code block in generation response".into()))?;

    // One recovery pass: re-extract the last block from the raw streams
    if let Err(reason) = check_generator_syntax(&code) {
        log.append(&format!("[GEN] syntax check failed ({reason}), re-extracting"));
        let retry_source = outcome.reasoning.as_deref().unwrap_or(&outcome.content);
        if let Some(block) = extract_code_block(retry_source)
            .and_then(|block| sanitize_generator_code(&block, &archive_name))
            && check_generator_syntax(&block).is_ok()
        {
            code = block;
        } else {
            return Err(PipelineError::EmptyCode(format!("generator fails syntax check: {reason}")));
        }
    }
    if code.trim().len() < MIN_GENERATOR_LEN {
        return Err(PipelineError::EmptyCode(format!(
            "generator too short ({} bytes)",
            code.trim().len()
        )));
    }

    std::fs::write(workspace.generator_path(), &code)
        .map_err(|e| PipelineError::Generator(format!("cannot write gen.py: {e}")))?;
    log.append(&format!("[GEN] gen.py saved ({} bytes)", code.len()));

    run_generator(env, log).await?;

    let rewritten = workspace.normalize_tests()?;
    if rewritten > 0 {
        log.append(&format!("[GEN] normalized {rewritten} test files"));
    }
    workspace
        .verify_tests_complete()
        .map_err(|e| PipelineError::Generator(e.to_string()))?;

    let archive = workspace.archive_tests(env.canonical_id)?;
    log.append(&format!("[GEN] ✓ archive packaged: {}", archive.display()));
    Ok(archive)
}

/// Execute gen.py with the configured interpreter and wall-clock limit;
/// stdout/stderr/exit code/elapsed are persisted beside the script
async fn run_generator(env: &StageEnv<'_>, log: &mut LogBatcher) -> Result<(), PipelineError> {
    let workspace = env.workspace;
    let config = &env.deps.config.pipeline;
    let timeout = Duration::from_secs(config.code_exec_timeout_minutes * 60);

    let (program, args) = config
        .generator_command
        .split_first()
        .ok_or_else(|| PipelineError::Generator("empty generator command".into()))?;

    log.append("[GEN] executing gen.py...");
    let started = Instant::now();
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .arg("gen.py")
            .current_dir(workspace.dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| PipelineError::Generator(format!("gen.py timed out after {timeout:?}")))?
    .map_err(|e| PipelineError::Generator(format!("cannot execute generator: {e}")))?;
    let elapsed = started.elapsed();

    let dir = workspace.dir();
    let _ = std::fs::write(dir.join("gen.returncode"), format!("{:?}", output.status.code()));
    let _ = std::fs::write(dir.join("gen.elapsed"), format!("{:.2}", elapsed.as_secs_f64()));
    if !output.stdout.is_empty() {
        let _ = std::fs::write(dir.join("gen_output.txt"), &output.stdout);
    }
    if !output.stderr.is_empty() {
        let _ = std::fs::write(dir.join("gen_error.txt"), &output.stderr);
    }

    debug!(status = ?output.status.code(), ?elapsed, "generator finished");
    log.append(&format!(
        "[GEN] gen.py exited with {:?} in {:.2}s",
        output.status.code(),
        elapsed.as_secs_f64()
    ));

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let summary: String = stderr.chars().take(500).collect();
        return Err(PipelineError::Generator(format!(
            "gen.py exited with {:?}: {summary}",
            output.status.code()
        )));
    }
    Ok(())
}

/// Make sure a usable `solution.cpp` exists, generating one when needed
///
/// `force` discards the existing file (used after a compile-error verdict).
pub(super) async fn ensure_solution(
    env: &StageEnv<'_>,
    log: &mut LogBatcher,
    temperature: f32,
    reference: Option<&str>,
    force: bool,
) -> Result<(), PipelineError> {
    let workspace = env.workspace;
    let path = workspace.solution_path();

    if !force
        && let Ok(existing) = std::fs::read_to_string(&path)
        && existing.trim().len() >= MIN_CODE_LEN
    {
        log.append(&format!("[SOLVE] reusing existing solution.cpp ({} bytes)", existing.len()));
        return Ok(());
    }

    let problem = workspace
        .load_problem()
        .ok_or_else(|| PipelineError::Generator("no statement saved; run fetch first".into()))?;

    let mut prompt = statement_markdown(&problem);
    if let Some(reference) = reference {
        prompt.push_str(reference);
    }
    prompt.push('\n');
    prompt.push_str(&env.deps.prompts.solution_task_requirements());

    let llm = env.llm()?;
    let request = ChatRequest::new(prompt)
        .with_system(env.deps.prompts.solution_system_prompt())
        .with_temperature(temperature);

    log.append(&format!(
        "[SOLVE] generating solution via {} (temperature={temperature:.2})",
        llm.provider_name()
    ));
    let outcome = blocking_chat(env.deps, llm, request).await?;

    let code = sanitize_solution_code(&outcome.content)
        .filter(|code| code.trim().len() >= MIN_CODE_LEN)
        .ok_or_else(|| {
            PipelineError::EmptyCode(format!(
                "solution too short ({} chars)",
                outcome.content.trim().len()
            ))
        })?;

    std::fs::write(&path, &code).map_err(|e| PipelineError::Generator(format!("cannot write solution: {e}")))?;
    log.append(&format!("[SOLVE] solution.cpp saved ({} bytes)", code.len()));
    Ok(())
}
