//! Upload stage: push the testcase archive to the destination judge

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::StageEnv;
use super::types::PipelineError;
use crate::adapters::{Adapter, AdapterError, JudgeAuth};
use crate::concurrency::interruptible_sleep;
use crate::events::LogBatcher;

const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Waiting for the write slot is bounded like any other remote operation
const WRITE_SLOT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub(super) struct UploadResult {
    pub real_id: Option<String>,
    pub url: Option<String>,
}

/// Preferred source is the top-level `real_id`, then the adapter-specific
/// alternates, then a URL parse
pub(super) fn extract_real_id(raw: &serde_json::Value) -> Option<String> {
    for candidate in [&raw["real_id"], &raw["actual_id"], &raw["response"]["real_id"]] {
        if let Some(id) = candidate.as_str().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        if let Some(id) = candidate.as_i64() {
            return Some(id.to_string());
        }
    }
    raw["url"]
        .as_str()
        .and_then(|url| url.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Upload with linear backoff; integrity refusals are terminal
pub(super) async fn run_upload(
    env: &StageEnv<'_>,
    adapter: &dyn Adapter,
    auth: &JudgeAuth,
    archive: &Path,
    log: &mut LogBatcher,
) -> Result<UploadResult, PipelineError> {
    let uploader = adapter
        .uploader()
        .ok_or(AdapterError::Unsupported {
            adapter: adapter.name(),
            operation: "upload_data",
        })?;

    let mut last_error: Option<PipelineError> = None;
    for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
        if env.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        log.append(&format!("[UPLOAD] attempt {attempt}/{MAX_UPLOAD_ATTEMPTS}"));

        let result = async {
            let _permit = env.deps.sems.acquire_remote_write(WRITE_SLOT_TIMEOUT).await?;
            uploader
                .upload_testcases(env.actx, auth, env.canonical_id, archive, false)
                .await
                .map_err(PipelineError::from)
        }
        .await;

        match result {
            Ok(outcome) if outcome.ok => {
                let real_id = extract_real_id(&outcome.raw);
                let mut upload = UploadResult::default();

                if let Some(real_id) = &real_id {
                    env.workspace.set_upload_real_id(adapter.name(), real_id)?;
                    upload.url = uploader.problem_url(env.actx, real_id);
                    log.append(&format!("[UPLOAD] ✓ uploaded, remote id {real_id}"));
                    if let Some(url) = &upload.url {
                        log.append(&format!("[UPLOAD] problem url: {url}"));
                    }
                } else {
                    // Not fatal; solve may still find the problem by search
                    log.append("[UPLOAD] ✓ uploaded, but response carried no remote id");
                }
                upload.real_id = real_id;
                return Ok(upload);
            }
            Ok(outcome) => {
                log.append(&format!("[UPLOAD] ✗ judge rejected the upload: {}", outcome.raw));
                last_error = Some(PipelineError::Adapter(AdapterError::Remote(format!(
                    "upload rejected: {}",
                    outcome.raw
                ))));
            }
            // Integrity refusals must never be retried into an overwrite
            Err(PipelineError::Adapter(e @ AdapterError::RefusedOverwrite(_))) => {
                log.append(&format!("[UPLOAD] ✗ {e}"));
                return Err(PipelineError::Adapter(e));
            }
            Err(e) => {
                log.append(&format!("[UPLOAD] ✗ attempt {attempt} failed: {e}"));
                last_error = Some(e);
            }
        }

        if attempt < MAX_UPLOAD_ATTEMPTS {
            let wait = Duration::from_secs(5 * attempt as u64);
            debug!(attempt, ?wait, "upload backoff");
            log.append(&format!("[UPLOAD] waiting {}s before retry", wait.as_secs()));
            if !interruptible_sleep(wait, env.token).await {
                return Err(PipelineError::Cancelled);
            }
        }
    }

    log.append("[UPLOAD] ✗ retry limit reached");
    Err(last_error.unwrap_or_else(|| {
        PipelineError::Adapter(AdapterError::Remote("upload failed with no recorded error".into()))
    }))
}
