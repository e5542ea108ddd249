//! Database layer for the Roost coordination server using Turso.
//!
//! Architecture:
//!   - Database file: .roost/roost.db
//!   - WAL mode: concurrent reads during writes
//!   - Schema: agents, tasks, task_deps, file_claims, context, agent_actions
//!   - Every mutation runs inside a [`Txn`] so the state change and its
//!     audit-log append commit atomically or not at all.

use chrono::{DateTime, Utc};
use roost_core::{
    ActionLogEntry, ActionType, Agent, AgentStatus, ContextEntry, CoordError, FileClaim, Task,
    TaskStatus,
};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use turso::{params, Builder, Connection};

/// Database connection wrapper for Turso.
pub struct Database {
    conn: Connection,
    path: String,
}

/// Database errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// Whether this error is transient lock contention worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Turso(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("busy") || msg.contains("locked")
            }
            _ => false,
        }
    }
}

impl From<DbError> for CoordError {
    fn from(e: DbError) -> Self {
        if e.is_busy() {
            CoordError::Busy
        } else {
            CoordError::Storage(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Filter options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Filter by task status (None = all statuses)
    pub status: Option<TaskStatus>,

    /// Filter by assigned agent (None = all agents)
    pub assigned_to: Option<String>,

    /// Limit the number of results (0 = no limit)
    pub limit: usize,
}

/// Filter options for querying the action log.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    /// Filter by actor (None = all actors)
    pub agent_id: Option<String>,

    /// Filter by referenced task (None = all)
    pub task_id: Option<String>,

    /// Filter by action type (None = all types)
    pub action_type: Option<ActionType>,

    /// Only entries at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Only entries at or before this instant
    pub until: Option<DateTime<Utc>>,

    /// Limit the number of results (0 = no limit)
    pub limit: usize,
}

impl Database {
    /// Open creates a new database connection at the specified path.
    ///
    /// The database is opened in embedded mode with WAL for concurrent
    /// reads. Missing parent directories are created.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // Use query() for PRAGMA statements as they may return results
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;
        let _ = conn.query("PRAGMA foreign_keys=ON", params![]).await?;

        Ok(Database {
            conn,
            path: path_str,
        })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// InitSchema creates the database schema if it doesn't exist.
    /// Idempotent - safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = vec![
            r#"CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'created',
                capabilities TEXT NOT NULL DEFAULT '[]',
                color TEXT,
                created_at TEXT NOT NULL,
                current_task TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'normal',
                assigned_to TEXT,
                parent_task TEXT,
                notes TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS task_deps (
                task_id TEXT NOT NULL,
                depends_on_id TEXT NOT NULL,
                PRIMARY KEY (task_id, depends_on_id),
                FOREIGN KEY (task_id) REFERENCES tasks(task_id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS file_claims (
                path TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS context (
                context_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                description TEXT,
                updated_by TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS agent_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                task_id TEXT,
                details TEXT NOT NULL DEFAULT '{}'
            )"#,
            // Indexes
            "CREATE INDEX IF NOT EXISTS idx_agents_token ON agents(token)",
            "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_assigned ON tasks(assigned_to)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task)",
            "CREATE INDEX IF NOT EXISTS idx_deps_on ON task_deps(depends_on_id)",
            "CREATE INDEX IF NOT EXISTS idx_claims_holder ON file_claims(holder)",
            "CREATE INDEX IF NOT EXISTS idx_actions_agent ON agent_actions(agent_id)",
            "CREATE INDEX IF NOT EXISTS idx_actions_task ON agent_actions(task_id)",
            "CREATE INDEX IF NOT EXISTS idx_actions_type ON agent_actions(action_type)",
            "CREATE INDEX IF NOT EXISTS idx_actions_time ON agent_actions(timestamp)",
        ];

        for stmt in statements {
            self.conn.execute(stmt, params![]).await?;
        }

        Ok(())
    }

    /// Begin a write transaction.
    pub async fn begin(&mut self) -> Result<Txn<'_>> {
        let tx = self.conn.transaction().await?;
        Ok(Txn { tx })
    }

    // ----- read-of-record queries (committed state only) -----

    /// Look up an agent by id. Returns None if unknown.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let rows = self
            .conn
            .query(AGENT_SELECT_BY_ID, params![agent_id])
            .await?;

        first_row(rows).await?.map(|row| parse_agent_row(&row)).transpose()
    }

    /// Look up an agent by bearer token. Returns None if unknown.
    pub async fn get_agent_by_token(&self, token: &str) -> Result<Option<Agent>> {
        let rows = self
            .conn
            .query(AGENT_SELECT_BY_TOKEN, params![token])
            .await?;

        first_row(rows).await?.map(|row| parse_agent_row(&row)).transpose()
    }

    /// List all agents with their tokens blanked.
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT agent_id, token, status, capabilities, color, created_at, current_task
                 FROM agents ORDER BY created_at ASC",
                params![],
            )
            .await?;

        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut agent = parse_agent_row(&row)?;
            agent.token = String::new();
            agents.push(agent);
        }

        Ok(agents)
    }

    /// Retrieve a task with its dependency set. Returns None if unknown.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let rows = self.conn.query(TASK_SELECT_BY_ID, params![task_id]).await?;

        let mut task = match first_row(rows).await? {
            Some(row) => parse_task_row(&row)?,
            None => return Ok(None),
        };

        let mut dep_rows = self
            .conn
            .query(
                "SELECT depends_on_id FROM task_deps WHERE task_id = ? ORDER BY depends_on_id ASC",
                params![task_id],
            )
            .await?;
        while let Some(row) = dep_rows.next().await? {
            task.depends_on_tasks.push(row.get(0)?);
        }

        Ok(Some(task))
    }

    /// Child task ids of a parent, oldest first.
    pub async fn child_tasks(&self, parent_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT task_id FROM tasks WHERE parent_task = ? ORDER BY created_at ASC",
                params![parent_id],
            )
            .await?;

        let mut children = Vec::new();
        while let Some(row) = rows.next().await? {
            children.push(row.get(0)?);
        }
        Ok(children)
    }

    /// ListTasks retrieves tasks matching the given filters,
    /// ordered by created_at ascending.
    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<turso::Value> = Vec::new();

        if let Some(status) = &filter.status {
            conditions.push("status = ?");
            params_vec.push(status.to_string().into());
        }

        if let Some(assigned_to) = &filter.assigned_to {
            conditions.push("assigned_to = ?");
            params_vec.push(assigned_to.clone().into());
        }

        let mut query = String::from(
            "SELECT task_id, title, description, status, priority,
                    assigned_to, parent_task, notes, created_at, updated_at
             FROM tasks",
        );

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY created_at ASC");

        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
            params_vec.push((filter.limit as i64).into());
        }

        let mut rows = self.conn.query(&query, params_vec).await?;
        let mut tasks = Vec::new();

        while let Some(row) = rows.next().await? {
            tasks.push(parse_task_row(&row)?);
        }

        self.attach_dependencies(&mut tasks).await?;
        Ok(tasks)
    }

    /// ListEligibleTasks finds pending tasks whose full dependency set is
    /// completed and whose parent (if any) has at least started.
    ///
    /// Results are ordered by priority (critical first), then created_at
    /// ascending so old work is not starved.
    pub async fn list_eligible_tasks(&self) -> Result<Vec<Task>> {
        let query = r#"
            SELECT t.task_id, t.title, t.description, t.status, t.priority,
                   t.assigned_to, t.parent_task, t.notes, t.created_at, t.updated_at
            FROM tasks t
            WHERE t.status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM task_deps d
                  JOIN tasks dep ON dep.task_id = d.depends_on_id
                  WHERE d.task_id = t.task_id AND dep.status != 'completed'
              )
              AND (t.parent_task IS NULL OR EXISTS (
                  SELECT 1 FROM tasks p
                  WHERE p.task_id = t.parent_task AND p.status != 'pending'
              ))
            ORDER BY t.created_at ASC
        "#;

        let mut rows = self.conn.query(query, params![]).await?;
        let mut tasks = Vec::new();

        while let Some(row) = rows.next().await? {
            tasks.push(parse_task_row(&row)?);
        }

        self.attach_dependencies(&mut tasks).await?;

        // Stable sort keeps the created_at ordering within each priority band
        tasks.sort_by_key(|t| t.priority.rank());
        Ok(tasks)
    }

    /// List all live file claims, ordered by claim time.
    pub async fn list_claims(&self) -> Result<Vec<FileClaim>> {
        let mut rows = self
            .conn
            .query(
                "SELECT path, holder, claimed_at FROM file_claims ORDER BY claimed_at ASC",
                params![],
            )
            .await?;

        let mut claims = Vec::new();
        while let Some(row) = rows.next().await? {
            claims.push(parse_claim_row(&row)?);
        }
        Ok(claims)
    }

    /// Look up a context entry by key. Returns None if unknown.
    pub async fn get_context(&self, key: &str) -> Result<Option<ContextEntry>> {
        let rows = self.conn.query(CONTEXT_SELECT_BY_KEY, params![key]).await?;

        first_row(rows).await?.map(|row| parse_context_row(&row)).transpose()
    }

    /// List all context entries, most recently updated first.
    pub async fn list_context(&self) -> Result<Vec<ContextEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT context_key, value, description, updated_by, last_updated
                 FROM context ORDER BY last_updated DESC",
                params![],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_context_row(&row)?);
        }
        Ok(entries)
    }

    /// QueryActions returns audit log entries matching the filter,
    /// ordered by (timestamp, insertion order) descending.
    pub async fn query_actions(&self, filter: ActionFilter) -> Result<Vec<ActionLogEntry>> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<turso::Value> = Vec::new();

        if let Some(agent_id) = &filter.agent_id {
            conditions.push("agent_id = ?");
            params_vec.push(agent_id.clone().into());
        }

        if let Some(task_id) = &filter.task_id {
            conditions.push("task_id = ?");
            params_vec.push(task_id.clone().into());
        }

        if let Some(action_type) = &filter.action_type {
            conditions.push("action_type = ?");
            params_vec.push(action_type.as_str().to_string().into());
        }

        if let Some(since) = &filter.since {
            conditions.push("timestamp >= ?");
            params_vec.push(since.to_rfc3339().into());
        }

        if let Some(until) = &filter.until {
            conditions.push("timestamp <= ?");
            params_vec.push(until.to_rfc3339().into());
        }

        let mut query = String::from(
            "SELECT id, timestamp, agent_id, action_type, task_id, details FROM agent_actions",
        );

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY timestamp DESC, id DESC");

        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
            params_vec.push((filter.limit as i64).into());
        }

        let mut rows = self.conn.query(&query, params_vec).await?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next().await? {
            entries.push(parse_action_row(&row)?);
        }
        Ok(entries)
    }

    /// Total number of audit log entries.
    pub async fn count_actions(&self) -> Result<i64> {
        let rows = self
            .conn
            .query("SELECT COUNT(*) FROM agent_actions", params![])
            .await?;

        match first_row(rows).await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    /// Load dependency edges for the given tasks in one pass.
    async fn attach_dependencies(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut rows = self
            .conn
            .query(
                "SELECT task_id, depends_on_id FROM task_deps ORDER BY depends_on_id ASC",
                params![],
            )
            .await?;

        let mut by_task: HashMap<String, Vec<String>> = HashMap::new();
        while let Some(row) = rows.next().await? {
            let task_id: String = row.get(0)?;
            let depends_on: String = row.get(1)?;
            by_task.entry(task_id).or_default().push(depends_on);
        }

        for task in tasks.iter_mut() {
            if let Some(deps) = by_task.remove(&task.task_id) {
                task.depends_on_tasks = deps;
            }
        }
        Ok(())
    }
}

/// A write transaction, borrowing the connection it runs on.
///
/// All reads performed through a Txn see the transaction's own uncommitted
/// writes, which is what makes check-then-act sequences (claim conflicts,
/// assignment races) safe. Callers must end a Txn with [`Txn::commit`] or
/// [`Txn::rollback`]: a dropped transaction is only rolled back lazily by
/// the next statement on the connection, which that statement then fails on.
pub struct Txn<'conn> {
    tx: turso::transaction::Transaction<'conn>,
}

impl Txn<'_> {
    /// Commit the transaction.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back the transaction, discarding state changes and audit
    /// appends alike.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    // ----- agents -----

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let rows = self.tx.query(AGENT_SELECT_BY_ID, params![agent_id]).await?;

        first_row(rows).await?.map(|row| parse_agent_row(&row)).transpose()
    }

    pub async fn get_agent_by_token(&self, token: &str) -> Result<Option<Agent>> {
        let rows = self
            .tx
            .query(AGENT_SELECT_BY_TOKEN, params![token])
            .await?;

        first_row(rows).await?.map(|row| parse_agent_row(&row)).transpose()
    }

    pub async fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let capabilities_json = serde_json::to_string(&agent.capabilities)?;
        debug!("Inserting agent: {}", agent.agent_id);

        self.tx
            .execute(
                "INSERT INTO agents (agent_id, token, status, capabilities, color, created_at, current_task)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    agent.agent_id.clone(),
                    agent.token.clone(),
                    agent.status.to_string(),
                    capabilities_json,
                    agent.color.clone(),
                    agent.created_at.to_rfc3339(),
                    agent.current_task.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        self.tx
            .execute(
                "UPDATE agents SET status = ? WHERE agent_id = ?",
                params![status.to_string(), agent_id],
            )
            .await?;
        Ok(())
    }

    pub async fn set_agent_current_task(
        &self,
        agent_id: &str,
        current_task: Option<&str>,
    ) -> Result<()> {
        self.tx
            .execute(
                "UPDATE agents SET current_task = ? WHERE agent_id = ?",
                params![current_task.map(|s| s.to_string()), agent_id],
            )
            .await?;
        Ok(())
    }

    // ----- tasks -----

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let rows = self.tx.query(TASK_SELECT_BY_ID, params![task_id]).await?;

        let mut task = match first_row(rows).await? {
            Some(row) => parse_task_row(&row)?,
            None => return Ok(None),
        };

        let mut dep_rows = self
            .tx
            .query(
                "SELECT depends_on_id FROM task_deps WHERE task_id = ? ORDER BY depends_on_id ASC",
                params![task_id],
            )
            .await?;
        while let Some(row) = dep_rows.next().await? {
            task.depends_on_tasks.push(row.get(0)?);
        }

        Ok(Some(task))
    }

    /// Insert a task row together with its dependency edges.
    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        let notes_json = serde_json::to_string(&task.notes)?;
        debug!("Inserting task: {}", task.task_id);

        self.tx
            .execute(
                "INSERT INTO tasks (task_id, title, description, status, priority,
                                    assigned_to, parent_task, notes, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    task.task_id.clone(),
                    task.title.clone(),
                    task.description.clone(),
                    task.status.to_string(),
                    task.priority.to_string(),
                    task.assigned_to.clone(),
                    task.parent_task.clone(),
                    notes_json,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .await?;

        for dep in &task.depends_on_tasks {
            self.tx
                .execute(
                    "INSERT INTO task_deps (task_id, depends_on_id) VALUES (?, ?)",
                    params![task.task_id.clone(), dep.clone()],
                )
                .await?;
        }

        Ok(())
    }

    /// Update the mutable columns of an existing task row.
    /// Dependency edges are immutable after creation and not touched here.
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let notes_json = serde_json::to_string(&task.notes)?;

        self.tx
            .execute(
                "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?,
                                  assigned_to = ?, notes = ?, updated_at = ?
                 WHERE task_id = ?",
                params![
                    task.title.clone(),
                    task.description.clone(),
                    task.status.to_string(),
                    task.priority.to_string(),
                    task.assigned_to.clone(),
                    notes_json,
                    task.updated_at.to_rfc3339(),
                    task.task_id.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    /// All dependency edges as (task_id, depends_on_id) pairs.
    /// Used for the insert-time cycle walk.
    pub async fn dependency_edges(&self) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .tx
            .query("SELECT task_id, depends_on_id FROM task_deps", params![])
            .await?;

        let mut edges = Vec::new();
        while let Some(row) = rows.next().await? {
            edges.push((row.get(0)?, row.get(1)?));
        }
        Ok(edges)
    }

    /// Dependencies of `task_id` that are not completed.
    pub async fn unmet_dependencies(&self, task_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .tx
            .query(
                "SELECT d.depends_on_id FROM task_deps d
                 JOIN tasks dep ON dep.task_id = d.depends_on_id
                 WHERE d.task_id = ? AND dep.status != 'completed'
                 ORDER BY d.depends_on_id ASC",
                params![task_id],
            )
            .await?;

        let mut unmet = Vec::new();
        while let Some(row) = rows.next().await? {
            unmet.push(row.get(0)?);
        }
        Ok(unmet)
    }

    /// Tasks currently assigned to an agent (non-terminal statuses only).
    pub async fn tasks_assigned_to(&self, agent_id: &str) -> Result<Vec<Task>> {
        let mut rows = self
            .tx
            .query(
                "SELECT task_id, title, description, status, priority,
                        assigned_to, parent_task, notes, created_at, updated_at
                 FROM tasks
                 WHERE assigned_to = ? AND status IN ('pending', 'in_progress')
                 ORDER BY created_at ASC",
                params![agent_id],
            )
            .await?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(parse_task_row(&row)?);
        }
        Ok(tasks)
    }

    // ----- file claims -----

    pub async fn get_claim(&self, path: &str) -> Result<Option<FileClaim>> {
        let rows = self
            .tx
            .query(
                "SELECT path, holder, claimed_at FROM file_claims WHERE path = ?",
                params![path],
            )
            .await?;

        first_row(rows).await?.map(|row| parse_claim_row(&row)).transpose()
    }

    pub async fn insert_claim(&self, claim: &FileClaim) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO file_claims (path, holder, claimed_at) VALUES (?, ?, ?)",
                params![
                    claim.path.clone(),
                    claim.holder.clone(),
                    claim.claimed_at.to_rfc3339(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete a claim. Idempotent - no error when the path is unclaimed.
    pub async fn delete_claim(&self, path: &str) -> Result<()> {
        self.tx
            .execute("DELETE FROM file_claims WHERE path = ?", params![path])
            .await?;
        Ok(())
    }

    /// Release every claim held by an agent, returning the released paths.
    pub async fn release_claims_for(&self, holder: &str) -> Result<Vec<String>> {
        let mut rows = self
            .tx
            .query(
                "SELECT path FROM file_claims WHERE holder = ? ORDER BY path ASC",
                params![holder],
            )
            .await?;

        let mut paths = Vec::new();
        while let Some(row) = rows.next().await? {
            paths.push(row.get::<String>(0)?);
        }
        drop(rows);

        self.tx
            .execute("DELETE FROM file_claims WHERE holder = ?", params![holder])
            .await?;
        Ok(paths)
    }

    // ----- context -----

    pub async fn get_context(&self, key: &str) -> Result<Option<ContextEntry>> {
        let rows = self.tx.query(CONTEXT_SELECT_BY_KEY, params![key]).await?;

        first_row(rows).await?.map(|row| parse_context_row(&row)).transpose()
    }

    pub async fn upsert_context(&self, entry: &ContextEntry) -> Result<()> {
        let value_json = serde_json::to_string(&entry.value)?;

        self.tx
            .execute(
                "INSERT INTO context (context_key, value, description, updated_by, last_updated)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(context_key) DO UPDATE SET
                     value = excluded.value,
                     description = excluded.description,
                     updated_by = excluded.updated_by,
                     last_updated = excluded.last_updated",
                params![
                    entry.context_key.clone(),
                    value_json,
                    entry.description.clone(),
                    entry.updated_by.clone(),
                    entry.last_updated.to_rfc3339(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Hard delete of a context key.
    pub async fn delete_context(&self, key: &str) -> Result<()> {
        self.tx
            .execute("DELETE FROM context WHERE context_key = ?", params![key])
            .await?;
        Ok(())
    }

    // ----- audit log -----

    /// Append one entry to the action log. Always called inside the same
    /// transaction as the mutation the entry describes.
    pub async fn append_action(&self, entry: &ActionLogEntry) -> Result<()> {
        let details_json = serde_json::to_string(&entry.details)?;

        self.tx
            .execute(
                "INSERT INTO agent_actions (timestamp, agent_id, action_type, task_id, details)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    entry.timestamp.to_rfc3339(),
                    entry.agent_id.clone(),
                    entry.action_type.as_str().to_string(),
                    entry.task_id.clone(),
                    details_json,
                ],
            )
            .await?;
        Ok(())
    }
}

const AGENT_SELECT_BY_ID: &str =
    "SELECT agent_id, token, status, capabilities, color, created_at, current_task
     FROM agents WHERE agent_id = ?";

const AGENT_SELECT_BY_TOKEN: &str =
    "SELECT agent_id, token, status, capabilities, color, created_at, current_task
     FROM agents WHERE token = ?";

const TASK_SELECT_BY_ID: &str =
    "SELECT task_id, title, description, status, priority,
            assigned_to, parent_task, notes, created_at, updated_at
     FROM tasks WHERE task_id = ?";

const CONTEXT_SELECT_BY_KEY: &str =
    "SELECT context_key, value, description, updated_by, last_updated
     FROM context WHERE context_key = ?";

/// First row of a result set, with the statement run to completion.
///
/// Turso ends a deferred transaction when a row-returning statement is
/// dropped mid-stream, leaving nothing for the commit that follows; every
/// single-row lookup therefore drains the remaining rows before returning.
async fn first_row(mut rows: turso::Rows) -> Result<Option<turso::Row>> {
    let first = rows.next().await?;
    while rows.next().await?.is_some() {}
    Ok(first)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Other(format!("failed to parse {}: {}", column, e)))
}

fn parse_agent_row(row: &turso::Row) -> Result<Agent> {
    let capabilities_json: String = row.get(3)?;
    let capabilities: Vec<String> = if capabilities_json.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&capabilities_json)?
    };

    let status_str: String = row.get(2)?;
    let created_at_str: String = row.get(5)?;

    Ok(Agent {
        agent_id: row.get(0)?,
        token: row.get(1)?,
        status: AgentStatus::from_str(&status_str).map_err(DbError::Other)?,
        capabilities,
        color: row.get(4)?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        current_task: row.get(6)?,
    })
}

fn parse_task_row(row: &turso::Row) -> Result<Task> {
    let status_str: String = row.get(3)?;
    let priority_str: String = row.get(4)?;
    let notes_json: String = row.get(7)?;
    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;

    let notes = if notes_json.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&notes_json)?
    };

    Ok(Task {
        task_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::from_str(&status_str).map_err(DbError::Other)?,
        priority: priority_str.parse().map_err(DbError::Other)?,
        assigned_to: row.get(5)?,
        depends_on_tasks: Vec::new(),
        parent_task: row.get(6)?,
        notes,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn parse_claim_row(row: &turso::Row) -> Result<FileClaim> {
    let claimed_at_str: String = row.get(2)?;

    Ok(FileClaim {
        path: row.get(0)?,
        holder: row.get(1)?,
        claimed_at: parse_timestamp(&claimed_at_str, "claimed_at")?,
    })
}

fn parse_context_row(row: &turso::Row) -> Result<ContextEntry> {
    let value_json: String = row.get(1)?;
    let last_updated_str: String = row.get(4)?;

    Ok(ContextEntry {
        context_key: row.get(0)?,
        value: serde_json::from_str(&value_json)?,
        description: row.get(2)?,
        updated_by: row.get(3)?,
        last_updated: parse_timestamp(&last_updated_str, "last_updated")?,
    })
}

fn parse_action_row(row: &turso::Row) -> Result<ActionLogEntry> {
    let timestamp_str: String = row.get(1)?;
    let action_type_str: String = row.get(3)?;
    let details_json: String = row.get(5)?;

    Ok(ActionLogEntry {
        id: row.get(0)?,
        timestamp: parse_timestamp(&timestamp_str, "timestamp")?,
        agent_id: row.get(2)?,
        action_type: ActionType::from(action_type_str),
        task_id: row.get(4)?,
        details: serde_json::from_str(&details_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_open_and_init() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("roost.db");

        let db = Database::open(&db_path).await.unwrap();
        db.init_schema().await.unwrap();

        let count = db.count_actions().await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_init_schema_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("roost.db");

        let db = Database::open(&db_path).await.unwrap();
        db.init_schema().await.unwrap();
        db.init_schema().await.unwrap();
    }
}
