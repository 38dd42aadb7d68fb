//! SQLite-backed persistence for tasks, users, and configuration
//!
//! One connection is shared process-wide behind a mutex; writes to a given
//! task row are serialized by the callers (one runner per task).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{TaskFilters, TaskPatch, TaskRow, TaskStats, TaskStatus, UserRow};
use crate::secrets::SecretStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    problem_id TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0,
    stage TEXT NOT NULL DEFAULT 'pending',
    source_judge TEXT,
    target_judge TEXT,
    uploaded_url TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS user_adapter_configs (
    user_id INTEGER NOT NULL,
    adapter TEXT NOT NULL,
    config TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, adapter)
);

CREATE TABLE IF NOT EXISTS user_module_settings (
    user_id INTEGER PRIMARY KEY,
    settings TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS system_configs (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    target TEXT NOT NULL,
    detail TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_user_status ON tasks(user_id, status);
CREATE INDEX IF NOT EXISTS idx_activity_user_id ON activity_logs(user_id);
"#;

/// Process-shared database handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (and migrate) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "database opened");
        Ok(Database { conn: Mutex::new(conn) })
    }

    /// In-memory database for tests
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Users ===

    pub fn create_user(&self, username: &str, is_admin: bool) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, is_admin, created_at) VALUES (?1, ?2, ?3)",
            params![username, is_admin as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, username, is_admin FROM users WHERE id = ?1",
                params![id],
                map_user_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_user_by_name(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, username, is_admin FROM users WHERE username = ?1",
                params![username],
                map_user_row,
            )
            .optional()?;
        Ok(row)
    }

    // === Tasks ===

    pub fn create_task(
        &self,
        user_id: i64,
        problem_id: &str,
        source_judge: Option<&str>,
        target_judge: Option<&str>,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tasks (user_id, problem_id, status, progress, stage, source_judge, target_judge, created_at, updated_at)
             VALUES (?1, ?2, 0, 0, 'pending', ?3, ?4, ?5, ?5)",
            params![user_id, problem_id, source_judge, target_judge, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(task_id = id, user_id, problem_id, "task created");
        Ok(id)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<TaskRow>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, user_id, problem_id, status, progress, stage, source_judge, target_judge,
                        uploaded_url, error_message, created_at, updated_at, completed_at
                 FROM tasks WHERE id = ?1",
                params![id],
                map_task_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let mut sets = vec!["updated_at = ?1".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now.clone())];

        if let Some(status) = patch.status {
            values.push(Box::new(status.as_i64()));
            sets.push(format!("status = ?{}", values.len()));
            if status.is_terminal() {
                values.push(Box::new(now.clone()));
                sets.push(format!("completed_at = ?{}", values.len()));
            }
        }
        if let Some(progress) = patch.progress {
            values.push(Box::new(progress));
            sets.push(format!("progress = ?{}", values.len()));
        }
        if let Some(stage) = &patch.stage {
            values.push(Box::new(stage.clone()));
            sets.push(format!("stage = ?{}", values.len()));
        }
        if let Some(url) = &patch.uploaded_url {
            values.push(Box::new(url.clone()));
            sets.push(format!("uploaded_url = ?{}", values.len()));
        }
        if let Some(err) = &patch.error_message {
            values.push(Box::new(err.clone()));
            sets.push(format!("error_message = ?{}", values.len()));
        }

        values.push(Box::new(id));
        let sql = format!("UPDATE tasks SET {} WHERE id = ?{}", sets.join(", "), values.len());
        let n = conn.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
        if n == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// List one user's tasks, newest first, with server-side filtering
    pub fn list_user_tasks(&self, user_id: i64, filters: &TaskFilters) -> Result<Vec<TaskRow>, StoreError> {
        let conn = self.conn();

        let mut sql = String::from(
            "SELECT id, user_id, problem_id, status, progress, stage, source_judge, target_judge,
                    uploaded_url, error_message, created_at, updated_at, completed_at
             FROM tasks WHERE user_id = ?1",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

        if let Some(search) = &filters.search {
            values.push(Box::new(format!("%{search}%")));
            sql.push_str(&format!(" AND problem_id LIKE ?{}", values.len()));
        }
        if let Some(status) = filters.status {
            values.push(Box::new(status.as_i64()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(source) = &filters.source_judge {
            values.push(Box::new(source.to_lowercase()));
            sql.push_str(&format!(" AND LOWER(source_judge) = ?{}", values.len()));
        }
        if let Some(target) = &filters.target_judge {
            values.push(Box::new(target.to_lowercase()));
            sql.push_str(&format!(" AND LOWER(target_judge) = ?{}", values.len()));
        }

        sql.push_str(" ORDER BY created_at DESC");
        let limit = filters.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                map_task_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Task counters, for one user or globally
    pub fn task_stats(&self, user_id: Option<i64>) -> Result<TaskStats, StoreError> {
        let conn = self.conn();
        let (sql, bind) = match user_id {
            Some(_) => ("SELECT status, COUNT(*) FROM tasks WHERE user_id = ?1 GROUP BY status", true),
            None => ("SELECT status, COUNT(*) FROM tasks GROUP BY status", false),
        };
        let mut stmt = conn.prepare(sql)?;

        let mut collect = |rows: &mut rusqlite::Rows<'_>| -> Result<TaskStats, rusqlite::Error> {
            let mut stats = TaskStats::default();
            while let Some(row) = rows.next()? {
                let status = TaskStatus::from_i64(row.get(0)?);
                let count: i64 = row.get(1)?;
                let count = count as u64;
                stats.total += count;
                match status {
                    TaskStatus::Pending => stats.pending += count,
                    TaskStatus::Running => stats.running += count,
                    TaskStatus::Completed => stats.completed += count,
                    TaskStatus::Failed => stats.failed += count,
                }
            }
            Ok(stats)
        };

        let stats = if bind {
            let mut rows = stmt.query(params![user_id])?;
            collect(&mut rows)?
        } else {
            let mut rows = stmt.query([])?;
            collect(&mut rows)?
        };
        Ok(stats)
    }

    // === Per-user adapter configuration ===

    /// Store a config blob, encrypting sensitive fields before the write
    pub fn set_user_adapter_config(
        &self,
        secrets: &SecretStore,
        user_id: i64,
        adapter: &str,
        config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut stored = config.clone();
        secrets.encrypt_fields(&mut stored)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO user_adapter_configs (user_id, adapter, config, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, adapter) DO UPDATE SET config = ?3, updated_at = ?4",
            params![user_id, adapter, stored.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read a config blob, decrypting sensitive fields
    pub fn get_user_adapter_config(
        &self,
        secrets: &SecretStore,
        user_id: i64,
        adapter: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT config FROM user_adapter_configs WHERE user_id = ?1 AND adapter = ?2",
                params![user_id, adapter],
                |r| r.get(0),
            )
            .optional()?;
        drop(conn);

        match raw {
            Some(text) => {
                let mut value: serde_json::Value = serde_json::from_str(&text)?;
                secrets.decrypt_fields(&mut value)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // === Per-user module settings ===

    pub fn set_user_module_settings(&self, user_id: i64, settings: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO user_module_settings (user_id, settings, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET settings = ?2, updated_at = ?3",
            params![user_id, settings.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_user_module_settings(&self, user_id: i64) -> Result<serde_json::Value, StoreError> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT settings FROM user_module_settings WHERE user_id = ?1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(serde_json::json!({})),
        }
    }

    // === System config key/value ===

    pub fn set_system_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO system_configs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_system_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM system_configs WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // === Activity log ===

    pub fn log_activity(
        &self,
        user_id: i64,
        action: &str,
        target: &str,
        detail: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO activity_logs (user_id, action, target, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, action, target, detail.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn map_user_row(r: &rusqlite::Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: r.get(0)?,
        username: r.get(1)?,
        is_admin: r.get::<_, i64>(2)? != 0,
    })
}

fn map_task_row(r: &rusqlite::Row<'_>) -> Result<TaskRow, rusqlite::Error> {
    Ok(TaskRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        problem_id: r.get(2)?,
        status: TaskStatus::from_i64(r.get(3)?),
        progress: r.get(4)?,
        stage: r.get(5)?,
        source_judge: r.get(6)?,
        target_judge: r.get(7)?,
        uploaded_url: r.get(8)?,
        error_message: r.get(9)?,
        created_at: parse_ts(r.get::<_, String>(10)?),
        updated_at: parse_ts(r.get::<_, String>(11)?),
        completed_at: r.get::<_, Option<String>>(12)?.map(parse_ts),
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
