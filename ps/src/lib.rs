//! problemstore - persistent state for the batch processor
//!
//! Two storage surfaces live here:
//!
//! - [`db`] - the SQLite database holding task rows, users, per-user adapter
//!   configuration (encrypted at rest), per-user module settings, and the
//!   system key/value table
//! - [`artifact`] - the per-(user, problem) workspace directories with their
//!   statement JSON, generated tests, archives, and processing status
//!
//! [`secrets`] provides the symmetric encryption both of them rely on.

pub mod artifact;
pub mod db;
pub mod error;
pub mod models;
pub mod secrets;

pub use artifact::{Workspace, atomic_write, sanitize_filename, workspace_base};
pub use db::Database;
pub use error::StoreError;
pub use models::{
    ProblemData, ProcessingStatus, Sample, TaskFilters, TaskPatch, TaskRow, TaskStats, TaskStatus,
    UserRow, ValidationSummary,
};
pub use secrets::SecretStore;
