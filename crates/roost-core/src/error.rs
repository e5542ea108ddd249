//! Unified error taxonomy for coordination operations.

use thiserror::Error;

/// Errors surfaced by the coordination core.
///
/// Every variant is terminal for the call that produced it except `Busy`,
/// which is retryable after backoff. `Unauthorized` is deliberately uniform:
/// it never reveals whether a token ever existed.
#[derive(Error, Debug)]
pub enum CoordError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("context key not found: {0}")]
    ContextNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task {task_id} has unmet dependencies: {unmet:?}")]
    DependencyNotSatisfied { task_id: String, unmet: Vec<String> },

    #[error("cyclic dependency involving task: {0}")]
    CyclicDependency(String),

    #[error("task {task_id} already assigned to {assigned_to}")]
    AlreadyAssigned { task_id: String, assigned_to: String },

    #[error("file {path} already claimed by {holder}")]
    Conflict { path: String, holder: String },

    #[error("file {0} is not held by the caller")]
    NotHeldByCaller(String),

    #[error("invalid claim path: {0}")]
    InvalidPath(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage busy, retry after backoff")]
    Busy,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias using CoordError.
pub type Result<T> = std::result::Result<T, CoordError>;
