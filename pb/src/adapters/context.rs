//! Per-call adapter context
//!
//! Adapter instances are process-global singletons; everything per-call,
//! most importantly the caller's user id, travels in this context. Config is
//! read freshly from the database on every operation so concurrent tenants
//! never see each other's credentials.

use std::path::PathBuf;
use std::sync::Arc;

use problemstore::{Database, SecretStore};

use super::types::AdapterError;
use crate::events::EventBus;

#[derive(Clone)]
pub struct AdapterContext {
    pub user_id: i64,
    pub db: Arc<Database>,
    pub secrets: Arc<SecretStore>,
    pub events: Arc<EventBus>,
    pub workspace_base: PathBuf,
}

impl AdapterContext {
    /// Read the caller's decrypted config blob for `adapter`
    pub fn adapter_config(&self, adapter: &str) -> Result<serde_json::Value, AdapterError> {
        Ok(self
            .db
            .get_user_adapter_config(&self.secrets, self.user_id, adapter)?
            .unwrap_or(serde_json::json!({})))
    }

    /// A required string field from the caller's config
    pub fn config_str(
        &self,
        adapter: &'static str,
        field: &'static str,
    ) -> Result<String, AdapterError> {
        let config = self.adapter_config(adapter)?;
        config[field]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or(AdapterError::ConfigMissing { adapter, field })
    }

    /// A required URL field; trailing slashes are dropped so joins stay
    /// predictable
    pub fn config_url(
        &self,
        adapter: &'static str,
        field: &'static str,
    ) -> Result<String, AdapterError> {
        Ok(self.config_str(adapter, field)?.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AdapterContext {
        let db = Arc::new(Database::in_memory().unwrap());
        let user_id = db.create_user("alice", false).unwrap();
        AdapterContext {
            user_id,
            db,
            secrets: Arc::new(SecretStore::with_key([1u8; 32])),
            events: EventBus::shared(),
            workspace_base: PathBuf::from("workspace"),
        }
    }

    #[test]
    fn test_missing_config_is_empty_object() {
        let ctx = context();
        assert_eq!(ctx.adapter_config("hydro").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_config_str_requires_field() {
        let ctx = context();
        let err = ctx.config_str("hydro", "base_url").unwrap_err();
        assert!(matches!(err, AdapterError::ConfigMissing { field: "base_url", .. }));

        ctx.db
            .set_user_adapter_config(
                &ctx.secrets,
                ctx.user_id,
                "hydro",
                &serde_json::json!({"base_url": "https://judge.example/", "password": "p4ss/"}),
            )
            .unwrap();
        // URL fields lose the trailing slash, ordinary fields keep theirs
        assert_eq!(ctx.config_url("hydro", "base_url").unwrap(), "https://judge.example");
        assert_eq!(ctx.config_str("hydro", "password").unwrap(), "p4ss/");
    }

    #[test]
    fn test_config_isolated_per_user() {
        let ctx = context();
        let other = ctx.db.create_user("bob", false).unwrap();
        ctx.db
            .set_user_adapter_config(
                &ctx.secrets,
                other,
                "hydro",
                &serde_json::json!({"base_url": "https://bobs-judge"}),
            )
            .unwrap();

        // Alice must not observe Bob's config
        assert!(ctx.config_str("hydro", "base_url").is_err());
    }
}
