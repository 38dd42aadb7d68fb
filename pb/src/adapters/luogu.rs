//! Luogu fetcher
//!
//! Luogu serves the statement as JSON when `_contentOnly=1` is appended, so
//! no HTML scraping is involved on this judge.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use problemstore::{ProblemData, Sample};

use super::types::AdapterError;
use super::{Adapter, AdapterContext, Capability, ProblemFetcher};

const BASE_URL: &str = "https://www.luogu.com.cn";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; probatch/0.1)";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"luogu\.com\.cn/problem/([A-Z]{1,3}\d{3,6})").expect("static regex")
});
static RAW_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[PBU]\d{4,6}$").expect("static regex"));

pub struct LuoguAdapter {
    fetcher: LuoguFetcher,
}

impl LuoguAdapter {
    pub fn new() -> Self {
        LuoguAdapter { fetcher: LuoguFetcher }
    }
}

impl Default for LuoguAdapter {
    fn default() -> Self {
        LuoguAdapter::new()
    }
}

#[async_trait]
impl Adapter for LuoguAdapter {
    fn name(&self) -> &'static str {
        "luogu"
    }

    fn display_name(&self) -> &'static str {
        "Luogu"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::FetchProblem]
    }

    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        Some(&self.fetcher)
    }
}

struct LuoguFetcher;

#[async_trait]
impl ProblemFetcher for LuoguFetcher {
    fn supports_url(&self, url: &str) -> bool {
        URL_RE.is_match(url) || RAW_ID_RE.is_match(url)
    }

    fn parse_problem_id(&self, input: &str) -> Option<String> {
        if let Some(caps) = URL_RE.captures(input) {
            return Some(caps[1].to_string());
        }
        if RAW_ID_RE.is_match(input) {
            return Some(input.to_string());
        }
        None
    }

    fn build_url(&self, origin_id: &str) -> Option<String> {
        Some(format!("{BASE_URL}/problem/{origin_id}"))
    }

    async fn fetch_problem(&self, _ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError> {
        let url = format!("{BASE_URL}/problem/{origin_id}?_contentOnly=1");
        debug!(%url, "fetching luogu statement");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status, body));
        }

        let body: serde_json::Value = response.json().await?;
        let problem = &body["currentData"]["problem"];
        if problem.is_null() {
            return Err(AdapterError::NotFound(format!("luogu problem {origin_id} not found")));
        }

        Ok(parse_problem(origin_id, problem))
    }
}

fn parse_problem(origin_id: &str, problem: &serde_json::Value) -> ProblemData {
    let text = |key: &str| problem[key].as_str().unwrap_or_default().to_string();

    let mut description = String::new();
    let background = text("background");
    if !background.trim().is_empty() {
        description.push_str(&background);
        description.push_str("\n\n");
    }
    description.push_str(&text("description"));

    let samples = problem["samples"]
        .as_array()
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let input = pair.get(0)?.as_str()?.to_string();
                    let output = pair.get(1)?.as_str()?.to_string();
                    Some(Sample { input, output })
                })
                .collect()
        })
        .unwrap_or_default();

    let time_limit_ms = problem["limits"]["time"]
        .as_array()
        .and_then(|times| times.iter().filter_map(|t| t.as_u64()).max());
    // Luogu reports memory in KiB
    let memory_limit_mb = problem["limits"]["memory"]
        .as_array()
        .and_then(|mems| mems.iter().filter_map(|m| m.as_u64()).max())
        .map(|kib| kib / 1024);

    let hint = text("hint");

    ProblemData {
        id: format!("luogu_{origin_id}"),
        source: "luogu".into(),
        title: text("title"),
        description,
        input_format: text("inputFormat"),
        output_format: text("outputFormat"),
        samples,
        time_limit_ms,
        memory_limit_mb,
        difficulty: problem["difficulty"].as_u64().map(|d| d.to_string()),
        tags: Vec::new(),
        hints: (!hint.trim().is_empty()).then_some(hint),
        author: None,
        url: format!("{BASE_URL}/problem/{origin_id}"),
        extra: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_support() {
        let fetcher = LuoguFetcher;
        assert!(fetcher.supports_url("https://www.luogu.com.cn/problem/P1000"));
        assert!(fetcher.supports_url("P1000"));
        assert!(fetcher.supports_url("B2001"));
        assert!(!fetcher.supports_url("https://codeforces.com/problemset/problem/1/A"));
        assert!(!fetcher.supports_url("1234A"));
    }

    #[test]
    fn test_parse_problem_id() {
        let fetcher = LuoguFetcher;
        assert_eq!(
            fetcher.parse_problem_id("https://www.luogu.com.cn/problem/P1000"),
            Some("P1000".into())
        );
        assert_eq!(fetcher.parse_problem_id("P1000"), Some("P1000".into()));
        assert_eq!(fetcher.parse_problem_id("nonsense"), None);
    }

    #[test]
    fn test_parse_then_build_url_round_trips() {
        let fetcher = LuoguFetcher;
        let id = fetcher.parse_problem_id("https://www.luogu.com.cn/problem/P1000").unwrap();
        let url = fetcher.build_url(&id).unwrap();
        assert!(fetcher.supports_url(&url));
        assert_eq!(fetcher.parse_problem_id(&url), Some(id));
    }

    #[test]
    fn test_parse_problem_payload() {
        let payload = serde_json::json!({
            "title": "A+B Problem",
            "background": "",
            "description": "Add two numbers.",
            "inputFormat": "Two integers.",
            "outputFormat": "Their sum.",
            "hint": "",
            "samples": [["1 2", "3"], ["4 5", "9"]],
            "limits": {"time": [1000, 1000], "memory": [131072, 131072]},
            "difficulty": 1,
        });
        let data = parse_problem("P1001", &payload);
        assert_eq!(data.id, "luogu_P1001");
        assert_eq!(data.title, "A+B Problem");
        assert_eq!(data.samples.len(), 2);
        assert_eq!(data.samples[1].output, "9");
        assert_eq!(data.time_limit_ms, Some(1000));
        assert_eq!(data.memory_limit_mb, Some(128));
        assert!(data.hints.is_none());
    }
}
