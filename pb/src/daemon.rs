//! Daemon wiring: construct the shared services and hand out the task
//! service callers drive

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::info;

use problemstore::{Database, SecretStore};

use crate::adapters::AdapterRegistry;
use crate::concurrency::{SemaphorePool, SubmitGate};
use crate::config::Config;
use crate::events::{EventBus, EventKind, TaskEvent};
use crate::pipeline::{DefaultLlmFactory, PipelineDeps};
use crate::prompts::TemplatePrompts;
use crate::resolver::ProblemIdResolver;
use crate::tasks::TaskService;
use crate::users::UserContextRegistry;

/// The assembled process: one of everything global, plus the task service
pub struct Daemon {
    pub deps: Arc<PipelineDeps>,
    pub service: Arc<TaskService>,
}

impl Daemon {
    /// Build every shared component from the configuration
    pub fn build(config: Config) -> Result<Self> {
        let database_path = config.database_path();
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).context("cannot create database directory")?;
        }
        let db = Arc::new(Database::open(&database_path).context("cannot open database")?);
        let secrets = Arc::new(SecretStore::open(&db).context("cannot initialize encryption")?);

        let registry = Arc::new(AdapterRegistry::with_builtins());
        let resolver = Arc::new(ProblemIdResolver::new(registry.clone()));
        let events = EventBus::shared();

        let concurrency = &config.concurrency;
        let sems = Arc::new(SemaphorePool::new(
            concurrency.llm_slots,
            concurrency.remote_read_slots,
            concurrency.remote_write_slots,
            concurrency.compile_slots,
        ));
        let submit_gate = Arc::new(SubmitGate::new(Duration::from_millis(
            concurrency.min_submit_interval_ms,
        )));

        let prompts = Arc::new(TemplatePrompts::new(config.storage.prompts_dir.clone()));
        let llm_factory = Arc::new(DefaultLlmFactory {
            timeout: Duration::from_secs(config.llm.request_timeout_minutes * 60),
        });
        let workspace_base = config.workspace_base();
        std::fs::create_dir_all(&workspace_base).context("cannot create workspace base")?;

        let deps = Arc::new(PipelineDeps {
            config: Arc::new(config),
            db,
            secrets,
            events: events.clone(),
            registry,
            resolver,
            sems,
            submit_gate,
            users: Arc::new(UserContextRegistry::new()),
            prompts,
            llm_factory,
            workspace_base,
        });

        let service = TaskService::new(deps.clone());
        events.emit(TaskEvent::new(EventKind::SystemStartup, 0, 0));
        info!("daemon assembled");

        Ok(Daemon { deps, service })
    }

    /// Cancel everything in flight and flush terminal states
    pub async fn shutdown(&self) {
        self.deps
            .events
            .emit(TaskEvent::new(EventKind::SystemShutdown, 0, 0));
        self.service.shutdown(true).await;
        self.deps.registry.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_daemon_builds_and_shuts_down() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.database = tmp.path().join("pb.db");
        config.storage.workspace = Some(tmp.path().join("workspace"));

        let daemon = Daemon::build(config).unwrap();
        assert!(daemon.deps.registry.get("hydro").is_some());
        assert!(!daemon.service.is_shutting_down());

        daemon.shutdown().await;
        assert!(daemon.service.is_shutting_down());
    }
}
