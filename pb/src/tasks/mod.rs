//! Task service: batch creation, scheduling, and reconciliation

mod service;

pub use service::{CreatedTask, TaskConfig, TaskService};
