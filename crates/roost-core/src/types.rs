//! Core data structures for the Roost coordination server.
//!
//! This module defines the entities shared by the storage layer and the
//! coordination engine: agents, tasks, file claims, context entries, and
//! action log records, together with their status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent represents a registered worker process.
///
/// The `token` is the agent's bearer secret. It is kept out of serialized
/// output unless explicitly populated (listings blank it before returning).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Agent {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    /// Display hint for dashboards; never behavior-relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

/// AgentStatus is the lifecycle state of an agent.
///
/// Termination is final: a terminated agent's token is permanently invalid
/// and its `agent_id` is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Active,
    Terminated,
}

impl AgentStatus {
    /// Whether an agent may self-report a move to `next`.
    /// Termination is excluded here; only an admin terminates.
    pub fn can_self_report(&self, next: AgentStatus) -> bool {
        matches!(
            (self, next),
            (AgentStatus::Created, AgentStatus::Active)
                | (AgentStatus::Active, AgentStatus::Active)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Created => write!(f, "created"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AgentStatus::Created),
            "active" => Ok(AgentStatus::Active),
            "terminated" => Ok(AgentStatus::Terminated),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// Task is a unit of work in the shared task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub task_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Tasks this task depends on. All must be completed before assignment.
    pub depends_on_tasks: Vec<String>,
    /// Parent task, if this task was created as a subtask.
    /// The inverse (`child_tasks`) is derived, not stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task: Option<String>,
    /// Append-only note history.
    pub notes: Vec<TaskNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), crate::CoordError> {
        if self.task_id.is_empty() {
            return Err(crate::CoordError::InvalidInput(
                "task_id is required".to_string(),
            ));
        }
        if self.title.is_empty() {
            return Err(crate::CoordError::InvalidInput(
                "title is required".to_string(),
            ));
        }
        if self.depends_on_tasks.iter().any(|d| d == &self.task_id) {
            return Err(crate::CoordError::CyclicDependency(self.task_id.clone()));
        }
        Ok(())
    }
}

/// TaskStatus with a forward-only state machine.
///
/// Allowed transitions:
///   pending -> in_progress | completed | failed | cancelled
///   in_progress -> completed | failed | cancelled
///
/// Terminal states (completed, failed, cancelled) are absorbing. A direct
/// pending -> completed skip is permitted so an admin can close out work
/// that never needed an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (TaskStatus::Pending, _) => true,
            (TaskStatus::InProgress, TaskStatus::Pending) => false,
            (TaskStatus::InProgress, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// TaskPriority orders eligible work: critical first, low last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Sort rank, ascending: critical=0 .. low=3.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(format!("unknown task priority: {}", other)),
        }
    }
}

/// TaskNote is one entry in a task's append-only note history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNote {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
}

/// FileClaim grants an agent exclusive write access to one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileClaim {
    /// Normalized workspace-relative path (see `paths::normalize_claim_path`).
    pub path: String,
    pub holder: String,
    pub claimed_at: DateTime<Utc>,
}

/// ContextEntry is one key in the shared key/value memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub context_key: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_by: String,
    pub last_updated: DateTime<Utc>,
}

/// ActionType tags entries in the audit log.
///
/// Known actions are enumerated so consumers never need substring matching;
/// `Other` carries forward-compatible tags verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    CreateAgent,
    TerminateAgent,
    AgentStatusReport,
    CreateTask,
    AssignTask,
    UpdateTaskStatus,
    UpdateTask,
    ClaimFile,
    ReleaseFile,
    UpdateContext,
    DeleteContext,
    Other(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::CreateAgent => "create_agent",
            ActionType::TerminateAgent => "terminate_agent",
            ActionType::AgentStatusReport => "agent_status_report",
            ActionType::CreateTask => "create_task",
            ActionType::AssignTask => "assign_task",
            ActionType::UpdateTaskStatus => "update_task_status",
            ActionType::UpdateTask => "update_task",
            ActionType::ClaimFile => "claim_file",
            ActionType::ReleaseFile => "release_file",
            ActionType::UpdateContext => "update_context",
            ActionType::DeleteContext => "delete_context",
            ActionType::Other(s) => s,
        }
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create_agent" => ActionType::CreateAgent,
            "terminate_agent" => ActionType::TerminateAgent,
            "agent_status_report" => ActionType::AgentStatusReport,
            "create_task" => ActionType::CreateTask,
            "assign_task" => ActionType::AssignTask,
            "update_task_status" => ActionType::UpdateTaskStatus,
            "update_task" => ActionType::UpdateTask,
            "claim_file" => ActionType::ClaimFile,
            "release_file" => ActionType::ReleaseFile,
            "update_context" => ActionType::UpdateContext,
            "delete_context" => ActionType::DeleteContext,
            _ => ActionType::Other(s),
        }
    }
}

impl From<ActionType> for String {
    fn from(a: ActionType) -> String {
        a.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ActionLogEntry is one record in the append-only audit log.
///
/// Entries are totally ordered by `(timestamp, id)` where `id` is the
/// storage layer's insertion sequence. The log is never rewritten;
/// corrections are new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Insertion sequence assigned by storage (0 before insert).
    #[serde(default)]
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Actor: an agent_id, or "admin".
    pub agent_id: String,
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub details: serde_json::Value,
}

/// Identity resolved from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// "admin" for the admin token, otherwise the agent's id.
    pub agent_id: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Role required by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Agent => write!(f, "agent"),
        }
    }
}
