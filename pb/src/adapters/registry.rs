//! Adapter registry: registration, lookup, and URL dispatch

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Adapter, AdapterContext, Capability};
use super::{CodeforcesAdapter, HydroAdapter, LuoguAdapter, ManualAdapter};

/// Process-global map of judge adapters
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry::default()
    }

    /// Registry pre-populated with the built-in judges
    pub fn with_builtins() -> Self {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(HydroAdapter::new()));
        registry.register(Arc::new(CodeforcesAdapter::new()));
        registry.register(Arc::new(LuoguAdapter::new()));
        registry.register(Arc::new(ManualAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        let name = adapter.name();
        if self.adapters.contains_key(name) {
            warn!(name, "adapter already registered, replacing");
        }
        debug!(name, capabilities = ?adapter.capabilities(), "adapter registered");
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters.values().cloned().collect()
    }

    /// The adapter whose fetcher recognizes the URL; priority breaks ties
    pub fn find_by_url(&self, url: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .values()
            .filter(|a| a.supports_url(url))
            .max_by_key(|a| a.priority())
            .cloned()
    }

    /// Highest-priority adapter declaring `capability` (and matching the
    /// URL, when one is given)
    pub fn find_by_capability(&self, capability: Capability, url: Option<&str>) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .values()
            .filter(|a| a.supports(capability))
            .filter(|a| url.is_none_or(|u| a.supports_url(u)))
            .max_by_key(|a| a.priority())
            .cloned()
    }

    /// Initialize every adapter; failures are logged, the adapter stays
    /// registered and must fail fast on use
    pub fn initialize_all(&self, ctx: &AdapterContext) {
        for adapter in self.adapters.values() {
            if adapter.initialize(ctx) {
                info!(name = adapter.name(), "adapter initialized");
            } else {
                warn!(name = adapter.name(), "adapter initialization failed");
            }
        }
    }

    pub fn shutdown_all(&self) {
        for adapter in self.adapters.values() {
            adapter.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::HealthStatus;

    #[test]
    fn test_builtins_registered() {
        let registry = AdapterRegistry::with_builtins();
        for name in ["hydro", "codeforces", "luogu", "manual"] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_url_dispatch() {
        let registry = AdapterRegistry::with_builtins();

        let adapter = registry
            .find_by_url("https://codeforces.com/problemset/problem/1234/A")
            .unwrap();
        assert_eq!(adapter.name(), "codeforces");

        let adapter = registry.find_by_url("https://www.luogu.com.cn/problem/P1000").unwrap();
        assert_eq!(adapter.name(), "luogu");

        assert!(registry.find_by_url("https://unknown-judge.example/p/1").is_none());
    }

    #[test]
    fn test_capability_dispatch() {
        let registry = AdapterRegistry::with_builtins();

        let uploader = registry.find_by_capability(Capability::UploadData, None).unwrap();
        assert_eq!(uploader.name(), "hydro");

        let fetcher = registry
            .find_by_capability(
                Capability::FetchProblem,
                Some("https://codeforces.com/contest/1/problem/A"),
            )
            .unwrap();
        assert_eq!(fetcher.name(), "codeforces");

        // No adapter both fetches and matches an unknown URL
        assert!(
            registry
                .find_by_capability(Capability::FetchProblem, Some("https://nowhere.example"))
                .is_none()
        );
    }

    #[test]
    fn test_health_reports() {
        let registry = AdapterRegistry::with_builtins();
        for adapter in registry.list() {
            let health = adapter.health_check();
            assert_eq!(health.status, HealthStatus::Ready);
            assert!(health.healthy);
        }
    }
}
