//! Reference-solution search hook
//!
//! Before a generation or solve prompt is built, adapters declaring
//! `ProvideSolution` may contribute an editorial block. The result is
//! opaque to the runner: presence or absence only changes prompt quality,
//! never correctness.

use std::sync::Arc;

use tracing::debug;

use crate::adapters::{AdapterContext, AdapterRegistry, Capability};

pub struct SolutionSearcher {
    registry: Arc<AdapterRegistry>,
    enabled: bool,
}

impl SolutionSearcher {
    pub fn new(registry: Arc<AdapterRegistry>, enabled: bool) -> Self {
        SolutionSearcher { registry, enabled }
    }

    /// A formatted reference block for the given problem, when any source
    /// has one
    pub async fn search(&self, ctx: &AdapterContext, source: &str, origin_id: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let adapter = self.registry.get(source)?;
        if !adapter.supports(Capability::ProvideSolution) {
            return None;
        }
        let provider = adapter.solution_provider()?;

        match provider.fetch_solution(ctx, origin_id).await {
            Ok(Some(solution)) => {
                debug!(source, origin_id, "reference solution found");
                let mut block = String::from("\n\n## Reference solutions\n");
                if let Some(url) = &solution.source_url {
                    block.push_str(&format!("Source: {url}\n"));
                }
                block.push_str(&format!("```{}\n{}\n```\n", solution.language, solution.code.trim_end()));
                Some(block)
            }
            Ok(None) => None,
            Err(e) => {
                // Search failures never block the pipeline
                debug!(source, origin_id, error = %e, "solution search failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::SolutionData;
    use crate::adapters::{Adapter, AdapterError, SolutionProvider};
    use crate::events::EventBus;
    use async_trait::async_trait;
    use problemstore::{Database, SecretStore};

    struct FakeProvider;

    #[async_trait]
    impl SolutionProvider for FakeProvider {
        async fn has_official_solution(&self, _ctx: &AdapterContext, _id: &str) -> bool {
            true
        }

        async fn fetch_solution(
            &self,
            _ctx: &AdapterContext,
            origin_id: &str,
        ) -> Result<Option<SolutionData>, AdapterError> {
            if origin_id == "has" {
                Ok(Some(SolutionData {
                    language: "cpp".into(),
                    code: "int main() {}".into(),
                    source_url: Some("https://blog.example/1".into()),
                }))
            } else {
                Ok(None)
            }
        }
    }

    struct FakeJudge {
        provider: FakeProvider,
    }

    #[async_trait]
    impl Adapter for FakeJudge {
        fn name(&self) -> &'static str {
            "fakejudge"
        }
        fn display_name(&self) -> &'static str {
            "Fake"
        }
        fn capabilities(&self) -> &[Capability] {
            &[Capability::ProvideSolution]
        }
        fn solution_provider(&self) -> Option<&dyn SolutionProvider> {
            Some(&self.provider)
        }
    }

    fn context() -> AdapterContext {
        let db = Arc::new(Database::in_memory().unwrap());
        let user_id = db.create_user("alice", false).unwrap();
        AdapterContext {
            user_id,
            db,
            secrets: Arc::new(SecretStore::with_key([1u8; 32])),
            events: EventBus::shared(),
            workspace_base: "workspace".into(),
        }
    }

    fn registry() -> Arc<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FakeJudge { provider: FakeProvider }));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_search_formats_block() {
        let searcher = SolutionSearcher::new(registry(), true);
        let block = searcher.search(&context(), "fakejudge", "has").await.unwrap();
        assert!(block.contains("## Reference solutions"));
        assert!(block.contains("int main"));
        assert!(block.contains("https://blog.example/1"));
    }

    #[tokio::test]
    async fn test_search_absent_is_none() {
        let searcher = SolutionSearcher::new(registry(), true);
        assert!(searcher.search(&context(), "fakejudge", "missing").await.is_none());
        assert!(searcher.search(&context(), "nonexistent", "has").await.is_none());
    }

    #[tokio::test]
    async fn test_search_disabled() {
        let searcher = SolutionSearcher::new(registry(), false);
        assert!(searcher.search(&context(), "fakejudge", "has").await.is_none());
    }
}
