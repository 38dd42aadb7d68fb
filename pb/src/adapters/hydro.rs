//! Hydro-family adapter: the destination judge
//!
//! Self-hosted Hydro instances expose a JSON view of every page when asked
//! with `Accept: application/json`, which is all this adapter speaks. The
//! instance location and credentials come from the caller's per-user config:
//! `base_url`, `domain`, `username`, `password`.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use problemstore::{ProblemData, Workspace};

use super::types::{
    AdapterError, JudgeAuth, SubmissionStatus, SubmitOutcome, UploadOutcome, Verdict,
};
use super::{
    Adapter, AdapterContext, Capability, DataUploader, ProblemFetcher, SolutionSubmitter,
};

const NAME: &str = "hydro";

/// Remote testdata is deleted in batches of at most this many files
const DELETE_BATCH: usize = 20;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^/]+/d/[^/]+/p/([A-Za-z0-9]+)").expect("static regex"));

pub struct HydroAdapter {
    fetcher: HydroFetcher,
    uploader: HydroUploader,
    submitter: HydroSubmitter,
}

impl HydroAdapter {
    pub fn new() -> Self {
        HydroAdapter {
            fetcher: HydroFetcher,
            uploader: HydroUploader,
            submitter: HydroSubmitter,
        }
    }
}

impl Default for HydroAdapter {
    fn default() -> Self {
        HydroAdapter::new()
    }
}

#[async_trait]
impl Adapter for HydroAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "Hydro"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::FetchProblem,
            Capability::UploadData,
            Capability::SubmitSolution,
            Capability::JudgeStatus,
        ]
    }

    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        Some(&self.fetcher)
    }

    fn uploader(&self) -> Option<&dyn DataUploader> {
        Some(&self.uploader)
    }

    fn submitter(&self) -> Option<&dyn SolutionSubmitter> {
        Some(&self.submitter)
    }

    async fn authenticate(&self, ctx: &AdapterContext) -> Result<JudgeAuth, AdapterError> {
        let base_url = ctx.config_url(NAME, "base_url")?;
        let username = ctx.config_str(NAME, "username")?;
        let password = ctx.config_str(NAME, "password")?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let response = client
            .post(format!("{base_url}/login"))
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "uname": username, "password": password }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status, body));
        }

        debug!(%base_url, "hydro login ok");
        // The session lives in the cookie jar; the token field carries the
        // account it belongs to
        Ok(JudgeAuth {
            token: username,
            client,
        })
    }
}

fn instance(ctx: &AdapterContext) -> Result<(String, String), AdapterError> {
    Ok((ctx.config_url(NAME, "base_url")?, ctx.config_str(NAME, "domain")?))
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value, AdapterError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::from_status(status, body));
    }
    Ok(response.json().await?)
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value, AdapterError> {
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .json(body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::from_status(status, body));
    }
    Ok(response.json().await.unwrap_or(serde_json::json!({})))
}

// === Fetch ===

struct HydroFetcher;

#[async_trait]
impl ProblemFetcher for HydroFetcher {
    fn supports_url(&self, url: &str) -> bool {
        URL_RE.is_match(url)
    }

    fn parse_problem_id(&self, input: &str) -> Option<String> {
        URL_RE.captures(input).map(|caps| caps[1].to_string())
    }

    async fn fetch_problem(&self, ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError> {
        let (base_url, domain) = instance(ctx)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let body = get_json(&client, &format!("{base_url}/d/{domain}/p/{origin_id}")).await?;

        let pdoc = &body["pdoc"];
        if pdoc.is_null() {
            return Err(AdapterError::NotFound(format!("hydro problem {origin_id} not found")));
        }

        Ok(ProblemData {
            id: format!("{NAME}_{origin_id}"),
            source: NAME.into(),
            title: pdoc["title"].as_str().unwrap_or_default().to_string(),
            description: statement_content(pdoc),
            tags: pdoc["tag"]
                .as_array()
                .map(|tags| tags.iter().filter_map(|t| t.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            url: format!("{base_url}/d/{domain}/p/{origin_id}"),
            ..Default::default()
        })
    }
}

/// Hydro stores content either as markdown or as a JSON map of locales
fn statement_content(pdoc: &serde_json::Value) -> String {
    let raw = pdoc["content"].as_str().unwrap_or_default();
    if let Ok(locales) = serde_json::from_str::<serde_json::Value>(raw)
        && let Some(map) = locales.as_object()
    {
        return map
            .values()
            .next()
            .and_then(|v| v.as_str())
            .unwrap_or(raw)
            .to_string();
    }
    raw.to_string()
}

// === Upload ===

struct HydroUploader;

impl HydroUploader {
    async fn remote_title(
        client: &reqwest::Client,
        base_url: &str,
        domain: &str,
        pid: &str,
    ) -> Result<Option<String>, AdapterError> {
        match get_json(client, &format!("{base_url}/d/{domain}/p/{pid}")).await {
            Ok(body) => Ok(body["pdoc"]["title"].as_str().map(String::from)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_problem(
        client: &reqwest::Client,
        base_url: &str,
        domain: &str,
        data: &ProblemData,
    ) -> Result<String, AdapterError> {
        let body = serde_json::json!({
            "title": data.title,
            "content": data.description,
            "tag": data.tags,
        });
        let response = post_json(client, &format!("{base_url}/d/{domain}/problem/create"), &body).await?;
        extract_created_pid(&response)
            .ok_or_else(|| AdapterError::Remote(format!("create returned no pid: {response}")))
    }

    async fn delete_existing_testdata(
        client: &reqwest::Client,
        base_url: &str,
        domain: &str,
        pid: &str,
    ) -> Result<usize, AdapterError> {
        let files_url = format!("{base_url}/d/{domain}/p/{pid}/files");
        let listing = get_json(client, &files_url).await?;
        let names: Vec<String> = listing["testdata"]
            .as_array()
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        // Batches of at most 20 keep the remote consistent mid-update
        for chunk in names.chunks(DELETE_BATCH) {
            let body = serde_json::json!({
                "operation": "delete_files",
                "type": "testdata",
                "files": chunk,
            });
            post_json(client, &files_url, &body).await?;
        }
        Ok(names.len())
    }

    async fn upload_archive(
        client: &reqwest::Client,
        base_url: &str,
        domain: &str,
        pid: &str,
        archive: &Path,
    ) -> Result<(), AdapterError> {
        let bytes = std::fs::read(archive)
            .map_err(|e| AdapterError::InvalidInput(format!("cannot read archive {}: {e}", archive.display())))?;
        let filename = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("testdata.zip")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .text("type", "testdata")
            .text("operation", "upload_file")
            .text("filename", filename.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename)
                    .mime_str("application/zip")
                    .map_err(|e| AdapterError::InvalidInput(e.to_string()))?,
            );

        let response = client
            .post(format!("{base_url}/d/{domain}/p/{pid}/files"))
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status, body));
        }
        Ok(())
    }
}

/// The create endpoint answers with one of several shapes depending on the
/// instance version
fn extract_created_pid(response: &serde_json::Value) -> Option<String> {
    if let Some(pid) = response["pid"].as_str() {
        return Some(pid.to_string());
    }
    if let Some(pid) = response["pid"].as_i64() {
        return Some(pid.to_string());
    }
    if let Some(doc_id) = response["pdoc"]["docId"].as_i64() {
        return Some(doc_id.to_string());
    }
    // Older instances only answer with a redirect URL
    response["url"]
        .as_str()
        .and_then(|url| URL_RE.captures(url))
        .map(|caps| caps[1].to_string())
}

#[async_trait]
impl DataUploader for HydroUploader {
    async fn upload_testcases(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        problem_id: &str,
        archive: &Path,
        skip_update: bool,
    ) -> Result<UploadOutcome, AdapterError> {
        let (base_url, domain) = instance(ctx)?;
        let workspace = Workspace::for_problem(&ctx.workspace_base, ctx.user_id, problem_id);
        let data = workspace
            .load_problem()
            .ok_or_else(|| AdapterError::InvalidInput(format!("no statement saved for {problem_id}")))?;

        // Existing remote problem: cached real_id first, exact-title search second
        let mut real_id = workspace.upload_real_id(NAME);
        if real_id.is_none() {
            real_id = self.search_exact_title(ctx, auth, &data.title).await?;
        }

        let (pid, created) = match real_id {
            Some(pid) => {
                // Never overwrite a problem that no longer matches ours
                let remote_title = Self::remote_title(&auth.client, &base_url, &domain, &pid).await?;
                match remote_title {
                    Some(title) if title == data.title => {}
                    Some(title) => {
                        return Err(AdapterError::RefusedOverwrite(format!(
                            "remote {pid} is titled `{title}`, local statement is `{}`",
                            data.title
                        )));
                    }
                    // Cached id points at a deleted problem; recreate
                    None => {
                        let pid = Self::create_problem(&auth.client, &base_url, &domain, &data).await?;
                        Self::upload_archive(&auth.client, &base_url, &domain, &pid, archive).await?;
                        return Ok(UploadOutcome {
                            ok: true,
                            created: true,
                            raw: serde_json::json!({ "real_id": pid, "response": { "code": 0 } }),
                        });
                    }
                }
                if !skip_update {
                    let deleted = Self::delete_existing_testdata(&auth.client, &base_url, &domain, &pid).await?;
                    debug!(pid, deleted, "stale remote testdata removed");
                    Self::upload_archive(&auth.client, &base_url, &domain, &pid, archive).await?;
                }
                (pid, false)
            }
            None => {
                let pid = Self::create_problem(&auth.client, &base_url, &domain, &data).await?;
                Self::upload_archive(&auth.client, &base_url, &domain, &pid, archive).await?;
                (pid, true)
            }
        };

        Ok(UploadOutcome {
            ok: true,
            created,
            raw: serde_json::json!({ "real_id": pid, "response": { "code": 0 } }),
        })
    }

    async fn search_exact_title(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        title: &str,
    ) -> Result<Option<String>, AdapterError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(None);
        }
        let (base_url, domain) = instance(ctx)?;
        let url = format!("{base_url}/d/{domain}/p?q={}", urlencode(title));
        let body = get_json(&auth.client, &url).await?;

        let hit = body["pdocs"].as_array().and_then(|pdocs| {
            pdocs
                .iter()
                .find(|p| p["title"].as_str() == Some(title))
                .and_then(|p| {
                    p["pid"]
                        .as_str()
                        .map(String::from)
                        .or_else(|| p["docId"].as_i64().map(|d| d.to_string()))
                })
        });
        Ok(hit)
    }

    fn problem_url(&self, ctx: &AdapterContext, real_id: &str) -> Option<String> {
        let (base_url, domain) = instance(ctx).ok()?;
        Some(format!("{base_url}/d/{domain}/p/{real_id}"))
    }
}

// === Submit ===

struct HydroSubmitter;

/// Hydro record status values
fn map_status(status: i64, score: Option<f64>) -> Verdict {
    match status {
        1 => Verdict::Accepted,
        2 => match score {
            Some(s) if s > 0.0 => Verdict::PartiallyAccepted,
            _ => Verdict::WrongAnswer,
        },
        3 => Verdict::TimeLimitExceeded,
        4 => Verdict::MemoryLimitExceeded,
        6 => Verdict::RuntimeError,
        7 => Verdict::CompileError,
        0 | 20 | 21 | 22 => Verdict::Judging,
        other => Verdict::Other(format!("status {other}")),
    }
}

#[async_trait]
impl SolutionSubmitter for HydroSubmitter {
    async fn submit_solution(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        problem_id: &str,
        code: &str,
        language_key: &str,
    ) -> Result<SubmitOutcome, AdapterError> {
        let (base_url, domain) = instance(ctx)?;
        let body = serde_json::json!({ "lang": language_key, "code": code });
        let response = post_json(
            &auth.client,
            &format!("{base_url}/d/{domain}/p/{problem_id}/submit"),
            &body,
        )
        .await?;

        let rid = response["rid"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AdapterError::Remote(format!("submit returned no record id: {response}")))?;

        Ok(SubmitOutcome {
            record_url: Some(format!("{base_url}/record/{rid}")),
            message: "submitted".into(),
            submission_id: rid,
        })
    }

    async fn submission_status(
        &self,
        ctx: &AdapterContext,
        auth: &JudgeAuth,
        submission_id: &str,
    ) -> Result<SubmissionStatus, AdapterError> {
        let (base_url, _) = instance(ctx)?;
        let body = get_json(&auth.client, &format!("{base_url}/record/{submission_id}")).await?;

        let rdoc = &body["rdoc"];
        if rdoc.is_null() {
            return Err(AdapterError::NotFound(format!("record {submission_id} not found")));
        }

        let score = rdoc["score"].as_f64();
        let verdict = map_status(rdoc["status"].as_i64().unwrap_or(0), score);
        let compiler_text = rdoc["compilerTexts"]
            .as_array()
            .map(|texts| {
                texts
                    .iter()
                    .filter_map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|t| !t.is_empty());

        Ok(SubmissionStatus {
            verdict,
            score,
            error_message: compiler_text,
            raw: body,
        })
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["cc.cc14o2".into(), "cc.cc17".into(), "py.py3".into()]
    }

    fn default_language(&self, hint: &str) -> String {
        match hint.to_lowercase().as_str() {
            "python" | "py" => "py.py3".into(),
            _ => "cc.cc14o2".into(),
        }
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parse() {
        let fetcher = HydroFetcher;
        assert!(fetcher.supports_url("https://oj.example.com/d/system/p/P42"));
        assert_eq!(
            fetcher.parse_problem_id("https://oj.example.com/d/system/p/P42"),
            Some("P42".into())
        );
        assert!(!fetcher.supports_url("https://codeforces.com/problemset/problem/1/A"));
    }

    #[test]
    fn test_statement_content_locale_map() {
        let pdoc = serde_json::json!({"content": r#"{"en": "Hello", "zh": "你好"}"#});
        assert_eq!(statement_content(&pdoc), "Hello");

        let pdoc = serde_json::json!({"content": "plain markdown"});
        assert_eq!(statement_content(&pdoc), "plain markdown");
    }

    #[test]
    fn test_extract_created_pid_shapes() {
        assert_eq!(
            extract_created_pid(&serde_json::json!({"pid": "P99"})),
            Some("P99".into())
        );
        assert_eq!(extract_created_pid(&serde_json::json!({"pid": 12})), Some("12".into()));
        assert_eq!(
            extract_created_pid(&serde_json::json!({"pdoc": {"docId": 7}})),
            Some("7".into())
        );
        assert_eq!(
            extract_created_pid(&serde_json::json!({"url": "https://oj.example/d/system/p/P5"})),
            Some("P5".into())
        );
        assert_eq!(extract_created_pid(&serde_json::json!({})), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(1, Some(100.0)), Verdict::Accepted);
        assert_eq!(map_status(2, Some(0.0)), Verdict::WrongAnswer);
        assert_eq!(map_status(2, Some(40.0)), Verdict::PartiallyAccepted);
        assert_eq!(map_status(7, None), Verdict::CompileError);
        assert_eq!(map_status(20, None), Verdict::Judging);
        assert_eq!(map_status(3, None), Verdict::TimeLimitExceeded);
        assert!(matches!(map_status(99, None), Verdict::Other(_)));
    }

    #[test]
    fn test_language_mapping() {
        let submitter = HydroSubmitter;
        assert_eq!(submitter.default_language("C++"), "cc.cc14o2");
        assert_eq!(submitter.default_language("python"), "py.py3");
        assert!(submitter.supported_languages().contains(&"cc.cc14o2".to_string()));
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("A+B Problem"), "A%2BB+Problem");
        assert_eq!(urlencode("plain"), "plain");
    }

    #[test]
    fn test_delete_batch_size() {
        // The contract caps delete batches at 20 files
        assert_eq!(DELETE_BATCH, 20);
        let names: Vec<String> = (0..45).map(|i| format!("{i}.in")).collect();
        let chunks: Vec<_> = names.chunks(DELETE_BATCH).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[2].len(), 5);
    }
}
