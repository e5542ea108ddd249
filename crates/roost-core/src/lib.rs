//! Roost Core - shared types for the agent coordination server
//!
//! This crate defines the entities, status enums, error taxonomy, claim-path
//! normalization, and configuration shared by the storage layer and the
//! coordination engine. It performs no I/O.

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::CoordConfig;
pub use error::{CoordError, Result};
pub use paths::normalize_claim_path;
pub use types::{
    ActionLogEntry, ActionType, Agent, AgentStatus, ContextEntry, FileClaim, Identity, Role, Task,
    TaskNote, TaskPriority, TaskStatus,
};
