//! Task graph engine: creation, dependency resolution, assignment, and the
//! status state machine.
//!
//! Dependency edges (`depends_on_tasks`) and parent/child links are
//! independent relations: a child task never implicitly depends on its
//! parent, but it cannot be assigned while the parent is still pending.

use chrono::Utc;
use roost_core::{
    ActionType, AgentStatus, CoordError, Result, Role, Task, TaskNote, TaskPriority, TaskStatus,
};
use roost_storage::{TaskFilter, Txn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;
use uuid::Uuid;

use crate::coordinator::{action_entry, finish, with_busy_retry, Coordinator};

/// Parameters for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    /// Explicit id; generated when None.
    pub task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    /// Tasks that must be completed before this one can be assigned.
    pub depends_on: Vec<String>,
    /// Parent task, when creating a subtask.
    pub parent: Option<String>,
}

/// Partial update of a task's mutable fields.
///
/// `note` appends to the task's note history; notes are never edited or
/// removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub note: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.note.is_none()
    }
}

impl Coordinator {
    /// Create a task. Admin or agent.
    ///
    /// Every dependency and the parent (if given) must already exist, and
    /// the dependency set must not introduce a cycle.
    pub async fn create_task(&self, token: &str, req: CreateTask) -> Result<Task> {
        if req.title.is_empty() {
            return Err(CoordError::InvalidInput("title is required".to_string()));
        }

        let mut db = self.db.lock().await;
        let task = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.create_task_in(&tx, token, &req).await;
                finish(tx, result).await
            }
            .await
        })?;

        info!("Created task {} ({})", task.task_id, task.priority);
        Ok(task)
    }

    async fn create_task_in(&self, tx: &Txn<'_>, token: &str, req: &CreateTask) -> Result<Task> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let task_id = match &req.task_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("task-{}", Uuid::new_v4().simple()),
        };

        if tx.get_task(&task_id).await?.is_some() {
            return Err(CoordError::AlreadyExists(format!("task {}", task_id)));
        }

        // A self-dependency is a cycle, not a missing task.
        if req.depends_on.iter().any(|d| d == &task_id) {
            return Err(CoordError::CyclicDependency(task_id));
        }

        for dep in &req.depends_on {
            if tx.get_task(dep).await?.is_none() {
                return Err(CoordError::TaskNotFound(dep.clone()));
            }
        }
        if let Some(parent) = &req.parent {
            if tx.get_task(parent).await?.is_none() {
                return Err(CoordError::TaskNotFound(parent.clone()));
            }
        }

        check_acyclic(tx, &task_id, &req.depends_on).await?;

        let now = Utc::now();
        let task = Task {
            task_id: task_id.clone(),
            title: req.title.clone(),
            description: req.description.clone(),
            status: TaskStatus::Pending,
            priority: req.priority,
            assigned_to: None,
            depends_on_tasks: req.depends_on.clone(),
            parent_task: req.parent.clone(),
            notes: vec![],
            created_at: now,
            updated_at: now,
        };
        task.validate()?;

        tx.insert_task(&task).await?;
        tx.append_action(&action_entry(
            &identity,
            ActionType::CreateTask,
            Some(&task.task_id),
            json!({
                "title": task.title,
                "priority": task.priority.to_string(),
                "depends_on": task.depends_on_tasks,
                "parent_task": task.parent_task,
            }),
        ))
        .await?;
        Ok(task)
    }

    /// Assign a task to an agent.
    ///
    /// Fails with `DependencyNotSatisfied` unless every dependency is
    /// completed (and the parent, if any, has started). Fails with
    /// `AlreadyAssigned` when the task is held by a different agent and the
    /// caller is not admin. On success a pending task moves to in_progress
    /// and the agent's `current_task` is set.
    pub async fn assign_task(&self, token: &str, task_id: &str, agent_id: &str) -> Result<Task> {
        let mut db = self.db.lock().await;
        let task = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.assign_task_in(&tx, token, task_id, agent_id).await;
                finish(tx, result).await
            }
            .await
        })?;

        info!(
            "Assigned task {} to {}",
            task.task_id,
            task.assigned_to.as_deref().unwrap_or("?")
        );
        Ok(task)
    }

    async fn assign_task_in(
        &self,
        tx: &Txn<'_>,
        token: &str,
        task_id: &str,
        agent_id: &str,
    ) -> Result<Task> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let mut task = tx
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoordError::TaskNotFound(task_id.to_string()))?;

        let assignee = match tx.get_agent(agent_id).await? {
            Some(agent) if agent.status != AgentStatus::Terminated => agent,
            _ => return Err(CoordError::AgentNotFound(agent_id.to_string())),
        };

        if task.status.is_terminal() {
            return Err(CoordError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }

        let unmet = tx.unmet_dependencies(&task.task_id).await?;
        if !unmet.is_empty() {
            return Err(CoordError::DependencyNotSatisfied {
                task_id: task.task_id,
                unmet,
            });
        }

        // A child task is not independently workable while its parent has
        // not started.
        if let Some(parent_id) = &task.parent_task {
            if let Some(parent) = tx.get_task(parent_id).await? {
                if parent.status == TaskStatus::Pending {
                    return Err(CoordError::DependencyNotSatisfied {
                        task_id: task.task_id,
                        unmet: vec![parent.task_id],
                    });
                }
            }
        }

        let previous = task.assigned_to.clone();
        if let Some(existing) = &previous {
            if existing != agent_id && !identity.is_admin() {
                return Err(CoordError::AlreadyAssigned {
                    task_id: task.task_id,
                    assigned_to: existing.clone(),
                });
            }
        }

        task.assigned_to = Some(assignee.agent_id.clone());
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::InProgress;
        }
        task.updated_at = Utc::now();
        tx.update_task(&task).await?;
        tx.set_agent_current_task(&assignee.agent_id, Some(&task.task_id))
            .await?;

        // The displaced assignee must not keep a back-reference to a task
        // that is no longer theirs.
        if let Some(prev) = &previous {
            if prev != &assignee.agent_id {
                if let Some(prev_agent) = tx.get_agent(prev).await? {
                    if prev_agent.current_task.as_deref() == Some(task.task_id.as_str()) {
                        tx.set_agent_current_task(prev, None).await?;
                    }
                }
            }
        }

        tx.append_action(&action_entry(
            &identity,
            ActionType::AssignTask,
            Some(&task.task_id),
            json!({
                "assigned_to": assignee.agent_id,
                "previous_assignee": previous,
                "status": task.status.to_string(),
            }),
        ))
        .await?;
        Ok(task)
    }

    /// Transition a task through the status state machine.
    ///
    /// Only the assignee or admin may transition a task. Terminal statuses
    /// are absorbing; an illegal move fails with `InvalidTransition`.
    pub async fn update_status(
        &self,
        token: &str,
        task_id: &str,
        new_status: TaskStatus,
    ) -> Result<Task> {
        let mut db = self.db.lock().await;
        let task = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.update_status_in(&tx, token, task_id, new_status).await;
                finish(tx, result).await
            }
            .await
        })?;

        info!("Task {} is now {}", task.task_id, task.status);
        Ok(task)
    }

    async fn update_status_in(
        &self,
        tx: &Txn<'_>,
        token: &str,
        task_id: &str,
        new_status: TaskStatus,
    ) -> Result<Task> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let mut task = tx
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoordError::TaskNotFound(task_id.to_string()))?;

        if !identity.is_admin() && task.assigned_to.as_deref() != Some(identity.agent_id.as_str()) {
            return Err(CoordError::Unauthorized);
        }

        let from = task.status;
        if !from.can_transition_to(new_status) {
            return Err(CoordError::InvalidTransition {
                from: from.to_string(),
                to: new_status.to_string(),
            });
        }

        task.status = new_status;
        task.updated_at = Utc::now();
        tx.update_task(&task).await?;

        // Leaving the graph's working set frees the assignee.
        if new_status.is_terminal() {
            if let Some(assignee) = &task.assigned_to {
                if let Some(agent) = tx.get_agent(assignee).await? {
                    if agent.current_task.as_deref() == Some(task.task_id.as_str()) {
                        tx.set_agent_current_task(assignee, None).await?;
                    }
                }
            }
        }

        tx.append_action(&action_entry(
            &identity,
            ActionType::UpdateTaskStatus,
            Some(&task.task_id),
            json!({
                "from": from.to_string(),
                "to": new_status.to_string(),
            }),
        ))
        .await?;
        Ok(task)
    }

    /// Apply a partial update to a task's mutable fields.
    ///
    /// The audit entry names exactly which fields changed. An empty patch is
    /// rejected rather than logged as a phantom mutation.
    pub async fn update_fields(&self, token: &str, task_id: &str, patch: TaskPatch) -> Result<Task> {
        if patch.is_empty() {
            return Err(CoordError::InvalidInput("no fields to update".to_string()));
        }
        if let Some(note) = &patch.note {
            if note.len() > self.config.max_note_len {
                return Err(CoordError::InvalidInput(format!(
                    "note exceeds {} bytes",
                    self.config.max_note_len
                )));
            }
        }

        let mut db = self.db.lock().await;
        with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.update_fields_in(&tx, token, task_id, &patch).await;
                finish(tx, result).await
            }
            .await
        })
    }

    async fn update_fields_in(
        &self,
        tx: &Txn<'_>,
        token: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let mut task = tx
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoordError::TaskNotFound(task_id.to_string()))?;

        // Assignee or admin; unassigned tasks accept updates from any agent.
        if !identity.is_admin() {
            if let Some(assignee) = &task.assigned_to {
                if assignee != &identity.agent_id {
                    return Err(CoordError::Unauthorized);
                }
            }
        }

        // Flags only; the new values live in the task row itself.
        let mut changed = serde_json::Map::new();
        if let Some(title) = &patch.title {
            task.title = title.clone();
            changed.insert("title_changed".to_string(), json!(true));
        }
        if let Some(description) = &patch.description {
            task.description = Some(description.clone());
            changed.insert("description_changed".to_string(), json!(true));
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
            changed.insert("priority_changed".to_string(), json!(true));
        }
        if let Some(note) = &patch.note {
            task.notes.push(TaskNote {
                timestamp: Utc::now(),
                author: identity.agent_id.clone(),
                content: note.clone(),
            });
            changed.insert("note_added".to_string(), json!(true));
        }

        task.updated_at = Utc::now();
        tx.update_task(&task).await?;

        tx.append_action(&action_entry(
            &identity,
            ActionType::UpdateTask,
            Some(&task.task_id),
            serde_json::Value::Object(changed),
        ))
        .await?;
        Ok(task)
    }

    /// Tasks currently eligible for work: pending, all dependencies
    /// completed, parent started. Ordered critical > high > normal > low,
    /// oldest first within a band so no task starves.
    pub async fn list_eligible_tasks(&self, token: &str) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.list_eligible_tasks().await?)
    }

    /// Fetch one task with its dependency set and children.
    pub async fn get_task(&self, token: &str, task_id: &str) -> Result<Task> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        db.get_task(task_id)
            .await?
            .ok_or_else(|| CoordError::TaskNotFound(task_id.to_string()))
    }

    /// Child task ids of a parent, oldest first.
    pub async fn child_tasks(&self, token: &str, task_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        if db.get_task(task_id).await?.is_none() {
            return Err(CoordError::TaskNotFound(task_id.to_string()));
        }
        Ok(db.child_tasks(task_id).await?)
    }

    /// List tasks matching a filter.
    pub async fn list_tasks(&self, token: &str, filter: TaskFilter) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.list_tasks(filter).await?)
    }
}

/// Reject a dependency set that would close a cycle through the new task.
///
/// Walks the existing dependency graph breadth-first from each new edge;
/// the walk is bounded by the total task count.
async fn check_acyclic(tx: &Txn<'_>, task_id: &str, depends_on: &[String]) -> Result<()> {
    if depends_on.is_empty() {
        return Ok(());
    }

    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for (from, to) in tx.dependency_edges().await? {
        graph.entry(from).or_default().push(to);
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = depends_on.iter().cloned().collect();

    while let Some(current) = queue.pop_front() {
        if current == task_id {
            return Err(CoordError::CyclicDependency(task_id.to_string()));
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(next) = graph.get(&current) {
            queue.extend(next.iter().cloned());
        }
    }

    Ok(())
}
