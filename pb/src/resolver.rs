//! Canonical problem ids
//!
//! Users hand in URLs, raw judge ids, or manual-paste markers; everything
//! downstream (workspace paths, cross-stage lookups, the tasks table) keys
//! on the canonical `<adapter>_<origin_id>` form. Canonicalization is
//! idempotent: feeding a canonical id back in returns it unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::adapters::AdapterRegistry;
use problemstore::Workspace;

pub struct ProblemIdResolver {
    registry: Arc<AdapterRegistry>,
}

impl ProblemIdResolver {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        ProblemIdResolver { registry }
    }

    /// Split a canonical id into (adapter, origin); only succeeds when the
    /// prefix names a registered adapter
    pub fn split_canonical<'a>(&self, id: &'a str) -> Option<(&'a str, &'a str)> {
        let (adapter, origin) = id.split_once('_')?;
        if origin.is_empty() || self.registry.get(adapter).is_none() {
            return None;
        }
        Some((adapter, origin))
    }

    /// Map any legitimate input form to `<adapter>_<origin_id>`
    ///
    /// Unrecognized inputs are returned unchanged so the mapping stays
    /// total and idempotent; they fail later with a clear adapter error.
    pub fn canonicalize(&self, input: &str) -> String {
        let input = input.trim();

        // Already canonical
        if self.split_canonical(input).is_some() {
            return input.to_string();
        }

        // Manual-paste marker in its colon form
        if let Some(marker) = input.strip_prefix("manual:")
            && !marker.is_empty()
        {
            return format!("manual_{marker}");
        }

        // URL or raw-id dispatch through the registry
        if let Some(adapter) = self.registry.find_by_url(input)
            && let Some(fetcher) = adapter.fetcher()
            && let Some(origin) = fetcher.parse_problem_id(input)
        {
            return format!("{}_{origin}", adapter.name());
        }

        debug!(input, "no adapter recognizes input, keeping verbatim");
        input.to_string()
    }

    /// Which adapter fetches this problem, by canonical prefix first and
    /// URL dispatch second
    pub fn fetch_adapter_name(&self, input: &str) -> Option<String> {
        let canonical = self.canonicalize(input);
        self.split_canonical(&canonical)
            .map(|(adapter, _)| adapter.to_string())
    }

    /// Origin id as the adapter expects it (`1234A`, `P1000`, ...)
    pub fn origin_id(&self, input: &str) -> Option<String> {
        let canonical = self.canonicalize(input);
        self.split_canonical(&canonical)
            .map(|(_, origin)| origin.to_string())
    }

    /// The workspace directory every stage of this problem shares
    pub fn workspace_for(&self, base: &Path, user_id: i64, input: &str) -> Workspace {
        Workspace::for_problem(base, user_id, &self.canonicalize(input))
    }

    pub fn workspace_dir(&self, base: &Path, user_id: i64, input: &str) -> PathBuf {
        self.workspace_for(base, user_id, input).dir().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> ProblemIdResolver {
        ProblemIdResolver::new(Arc::new(AdapterRegistry::with_builtins()))
    }

    #[test]
    fn test_url_forms() {
        let r = resolver();
        assert_eq!(
            r.canonicalize("https://codeforces.com/problemset/problem/1234/A"),
            "codeforces_1234A"
        );
        assert_eq!(
            r.canonicalize("https://www.luogu.com.cn/problem/P1000"),
            "luogu_P1000"
        );
        assert_eq!(
            r.canonicalize("https://oj.example.com/d/system/p/P42"),
            "hydro_P42"
        );
    }

    #[test]
    fn test_raw_ids() {
        let r = resolver();
        assert_eq!(r.canonicalize("1234A"), "codeforces_1234A");
        assert_eq!(r.canonicalize("P1000"), "luogu_P1000");
    }

    #[test]
    fn test_manual_markers() {
        let r = resolver();
        assert_eq!(r.canonicalize("manual:20240101"), "manual_20240101");
        assert_eq!(r.canonicalize("manual_20240101"), "manual_20240101");
    }

    #[test]
    fn test_unknown_kept_verbatim() {
        let r = resolver();
        assert_eq!(r.canonicalize("weird input"), "weird input");
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let r = resolver();
        for input in [
            "https://codeforces.com/problemset/problem/1234/A",
            "1234A",
            "P1000",
            "manual:x",
            "already_weird",
            "",
        ] {
            let once = r.canonicalize(input);
            assert_eq!(r.canonicalize(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_split_and_origin() {
        let r = resolver();
        assert_eq!(
            r.split_canonical("codeforces_1234A"),
            Some(("codeforces", "1234A"))
        );
        assert_eq!(r.split_canonical("unknownjudge_1"), None);
        assert_eq!(r.split_canonical("codeforces_"), None);
        assert_eq!(r.origin_id("https://www.luogu.com.cn/problem/P1000").as_deref(), Some("P1000"));
        assert_eq!(r.fetch_adapter_name("1234A").as_deref(), Some("codeforces"));
    }

    #[test]
    fn test_workspace_dir_sanitized() {
        let r = resolver();
        let dir = r.workspace_dir(Path::new("/data"), 3, "https://codeforces.com/problemset/problem/1/A");
        assert_eq!(dir, PathBuf::from("/data/user_3/problem_codeforces_1A"));
    }

    proptest! {
        #[test]
        fn prop_canonicalize_idempotent(input in ".{0,60}") {
            let r = resolver();
            let once = r.canonicalize(&input);
            prop_assert_eq!(r.canonicalize(&once), once);
        }
    }
}
