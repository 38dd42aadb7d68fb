//! Codeforces fetcher and editorial lookup
//!
//! The statement page is fetched as HTML and converted to markdown with
//! fast_html2md; structural extraction stays deliberately shallow since the
//! statement text only feeds LLM prompts.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use problemstore::{ProblemData, Sample};

use super::types::{AdapterError, SolutionData};
use super::{Adapter, AdapterContext, Capability, ProblemFetcher, SolutionProvider};

const BASE_URL: &str = "https://codeforces.com";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; probatch/0.1)";

static PROBLEMSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"codeforces\.com/problemset/problem/(\d+)/([A-Z]\d?)").expect("static regex")
});
static CONTEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"codeforces\.com/contest/(\d+)/problem/([A-Z]\d?)").expect("static regex")
});
static RAW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([A-Z]\d?)$").expect("static regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div class="title">\s*[A-Z]\d?\.\s*([^<]+)</div>"#).expect("static regex"));
static SAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<pre>(.*?)</pre>").expect("static regex")
});

pub struct CodeforcesAdapter {
    fetcher: CodeforcesFetcher,
    provider: CodeforcesSolutionProvider,
}

impl CodeforcesAdapter {
    pub fn new() -> Self {
        CodeforcesAdapter {
            fetcher: CodeforcesFetcher,
            provider: CodeforcesSolutionProvider,
        }
    }
}

impl Default for CodeforcesAdapter {
    fn default() -> Self {
        CodeforcesAdapter::new()
    }
}

#[async_trait]
impl Adapter for CodeforcesAdapter {
    fn name(&self) -> &'static str {
        "codeforces"
    }

    fn display_name(&self) -> &'static str {
        "Codeforces"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::FetchProblem, Capability::ProvideSolution]
    }

    fn fetcher(&self) -> Option<&dyn ProblemFetcher> {
        Some(&self.fetcher)
    }

    fn solution_provider(&self) -> Option<&dyn SolutionProvider> {
        Some(&self.provider)
    }
}

struct CodeforcesFetcher;

fn split_origin(origin_id: &str) -> Option<(&str, &str)> {
    let caps = RAW_ID_RE.captures(origin_id)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

#[async_trait]
impl ProblemFetcher for CodeforcesFetcher {
    fn supports_url(&self, url: &str) -> bool {
        PROBLEMSET_RE.is_match(url) || CONTEST_RE.is_match(url) || RAW_ID_RE.is_match(url)
    }

    fn parse_problem_id(&self, input: &str) -> Option<String> {
        for re in [&*PROBLEMSET_RE, &*CONTEST_RE] {
            if let Some(caps) = re.captures(input) {
                return Some(format!("{}{}", &caps[1], &caps[2]));
            }
        }
        if RAW_ID_RE.is_match(input) {
            return Some(input.to_string());
        }
        None
    }

    fn build_url(&self, origin_id: &str) -> Option<String> {
        let (contest, index) = split_origin(origin_id)?;
        Some(format!("{BASE_URL}/problemset/problem/{contest}/{index}"))
    }

    async fn fetch_problem(&self, _ctx: &AdapterContext, origin_id: &str) -> Result<ProblemData, AdapterError> {
        let url = self
            .build_url(origin_id)
            .ok_or_else(|| AdapterError::InvalidInput(format!("bad codeforces id: {origin_id}")))?;
        debug!(%url, "fetching codeforces statement");

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

        let html = response.text().await?;
        // A redirect to the problemset index means the problem id is bogus
        if !html.contains("problem-statement") {
            return Err(AdapterError::NotFound(format!("codeforces problem {origin_id} not found")));
        }

        Ok(parse_statement(origin_id, &url, &html))
    }
}

fn parse_statement(origin_id: &str, url: &str, html: &str) -> ProblemData {
    let title = TITLE_RE
        .captures(html)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| origin_id.to_string());

    // Sample blocks come in input/output <pre> pairs
    let pres: Vec<String> = SAMPLE_RE
        .captures_iter(html)
        .map(|caps| strip_tags(&caps[1]))
        .collect();
    let samples = pres
        .chunks(2)
        .filter_map(|pair| match pair {
            [input, output] => Some(Sample {
                input: input.clone(),
                output: output.clone(),
            }),
            _ => None,
        })
        .collect();

    let description = html2md::rewrite_html(html, false);

    ProblemData {
        id: format!("codeforces_{origin_id}"),
        source: "codeforces".into(),
        title,
        description,
        samples,
        url: url.to_string(),
        ..Default::default()
    }
}

fn strip_tags(fragment: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
    let text = TAG_RE.replace_all(fragment, "\n");
    let lines: Vec<&str> = text.lines().map(str::trim_end).filter(|l| !l.is_empty()).collect();
    let mut joined = lines.join("\n");
    if !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

struct CodeforcesSolutionProvider;

#[async_trait]
impl SolutionProvider for CodeforcesSolutionProvider {
    async fn has_official_solution(&self, ctx: &AdapterContext, origin_id: &str) -> bool {
        self.fetch_solution(ctx, origin_id)
            .await
            .is_ok_and(|s| s.is_some())
    }

    /// Look for a tutorial link on the problem page; returns the editorial
    /// text as an opaque reference block
    async fn fetch_solution(
        &self,
        _ctx: &AdapterContext,
        origin_id: &str,
    ) -> Result<Option<SolutionData>, AdapterError> {
        let Some((contest, index)) = split_origin(origin_id) else {
            return Ok(None);
        };
        let url = format!("{BASE_URL}/problemset/problem/{contest}/{index}");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let html = response.text().await?;

        static TUTORIAL_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r#"href="(/blog/entry/\d+)"[^>]*>\s*Tutorial"#).expect("static regex"));
        let Some(caps) = TUTORIAL_RE.captures(&html) else {
            return Ok(None);
        };
        let tutorial_url = format!("{BASE_URL}{}", &caps[1]);

        let response = client.get(&tutorial_url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let tutorial_html = response.text().await?;
        let text = html2md::rewrite_html(&tutorial_html, false);

        Ok(Some(SolutionData {
            language: "text".into(),
            code: text,
            source_url: Some(tutorial_url),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_support() {
        let fetcher = CodeforcesFetcher;
        assert!(fetcher.supports_url("https://codeforces.com/problemset/problem/1234/A"));
        assert!(fetcher.supports_url("https://codeforces.com/contest/1234/problem/B1"));
        assert!(fetcher.supports_url("1234A"));
        assert!(!fetcher.supports_url("P1000"));
        assert!(!fetcher.supports_url("https://www.luogu.com.cn/problem/P1000"));
    }

    #[test]
    fn test_parse_problem_id() {
        let fetcher = CodeforcesFetcher;
        assert_eq!(
            fetcher.parse_problem_id("https://codeforces.com/problemset/problem/1234/A"),
            Some("1234A".into())
        );
        assert_eq!(
            fetcher.parse_problem_id("https://codeforces.com/contest/567/problem/C"),
            Some("567C".into())
        );
        assert_eq!(fetcher.parse_problem_id("1234A"), Some("1234A".into()));
        assert_eq!(fetcher.parse_problem_id("abc"), None);
    }

    #[test]
    fn test_parse_then_build_url_round_trips() {
        let fetcher = CodeforcesFetcher;
        let id = fetcher
            .parse_problem_id("https://codeforces.com/contest/1234/problem/A")
            .unwrap();
        let url = fetcher.build_url(&id).unwrap();
        assert!(fetcher.supports_url(&url));
        assert_eq!(fetcher.parse_problem_id(&url), Some(id));
    }

    #[test]
    fn test_parse_statement_extracts_title_and_samples() {
        let html = r#"
            <div class="problem-statement">
              <div class="title">A. Theatre Square</div>
              <div class="sample-test">
                <pre>6 6 4</pre>
                <pre>4</pre>
                <pre>1 1 1</pre>
                <pre>1</pre>
              </div>
            </div>"#;
        let data = parse_statement("1A", "https://codeforces.com/problemset/problem/1/A", html);
        assert_eq!(data.title, "Theatre Square");
        assert_eq!(data.id, "codeforces_1A");
        assert_eq!(data.samples.len(), 2);
        assert_eq!(data.samples[0].input, "6 6 4\n");
        assert_eq!(data.samples[0].output, "4\n");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("1 2<br/>3 4"), "1 2\n3 4\n");
        assert_eq!(strip_tags(""), "");
    }
}
