//! Agent identity lifecycle: registration, self-reporting, termination.

use chrono::Utc;
use roost_core::{Agent, AgentStatus, CoordError, Result, Role, TaskStatus};
use roost_storage::Txn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::coordinator::{action_entry, finish, new_token, with_busy_retry, Coordinator};
use roost_core::ActionType;

/// Outcome of a termination: what was cleaned up alongside the status flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationReport {
    pub agent_id: String,
    /// Claims released in the same transaction.
    pub released_claims: Vec<String>,
    /// Tasks reverted to pending (only when reassignment was requested).
    pub reassigned_tasks: Vec<String>,
}

/// An agent's self-reported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: AgentStatus,
    /// What the agent is working on right now; None clears the field.
    pub current_task: Option<String>,
}

impl Coordinator {
    /// Register a new agent and mint its bearer token. Admin only.
    ///
    /// Fails with `AlreadyExists` if the id is taken - including by a
    /// terminated agent, since agent ids are never reused.
    pub async fn create_agent(
        &self,
        admin_token: &str,
        agent_id: &str,
        capabilities: Vec<String>,
        color: Option<String>,
    ) -> Result<Agent> {
        if agent_id.is_empty() || agent_id == "admin" {
            return Err(CoordError::InvalidInput(format!(
                "invalid agent_id: {:?}",
                agent_id
            )));
        }

        let mut db = self.db.lock().await;
        let agent = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self
                    .create_agent_in(&tx, admin_token, agent_id, &capabilities, &color)
                    .await;
                finish(tx, result).await
            }
            .await
        })?;

        info!("Created agent {}", agent.agent_id);
        Ok(agent)
    }

    async fn create_agent_in(
        &self,
        tx: &Txn<'_>,
        admin_token: &str,
        agent_id: &str,
        capabilities: &[String],
        color: &Option<String>,
    ) -> Result<Agent> {
        let admin = self.identify_tx(tx, admin_token, Role::Admin).await?;

        if tx.get_agent(agent_id).await?.is_some() {
            return Err(CoordError::AlreadyExists(format!("agent {}", agent_id)));
        }

        let agent = Agent {
            agent_id: agent_id.to_string(),
            token: new_token(),
            status: AgentStatus::Created,
            capabilities: capabilities.to_vec(),
            color: color.clone(),
            created_at: Utc::now(),
            current_task: None,
        };

        tx.insert_agent(&agent).await?;
        tx.append_action(&action_entry(
            &admin,
            ActionType::CreateAgent,
            None,
            json!({
                "agent_id": agent.agent_id,
                "capabilities": agent.capabilities,
            }),
        ))
        .await?;
        Ok(agent)
    }

    /// Terminate an agent. Admin only.
    ///
    /// The token becomes permanently invalid and every file claim the agent
    /// holds is released in the same transaction. By default tasks assigned
    /// to the agent keep their assignment (a conservative default so an
    /// operator can inspect interrupted work); with `reassign_tasks` the
    /// agent's unfinished tasks revert to pending and are unassigned.
    ///
    /// Terminating an unknown or already-terminated agent yields
    /// `AgentNotFound` - the call never corrupts state when repeated.
    pub async fn terminate_agent(
        &self,
        admin_token: &str,
        agent_id: &str,
        reassign_tasks: bool,
    ) -> Result<TerminationReport> {
        let mut db = self.db.lock().await;
        let report = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self
                    .terminate_agent_in(&tx, admin_token, agent_id, reassign_tasks)
                    .await;
                finish(tx, result).await
            }
            .await
        })?;

        info!(
            "Terminated agent {} ({} claims released)",
            report.agent_id,
            report.released_claims.len()
        );
        Ok(report)
    }

    async fn terminate_agent_in(
        &self,
        tx: &Txn<'_>,
        admin_token: &str,
        agent_id: &str,
        reassign_tasks: bool,
    ) -> Result<TerminationReport> {
        let admin = self.identify_tx(tx, admin_token, Role::Admin).await?;

        let agent = match tx.get_agent(agent_id).await? {
            Some(agent) if agent.status != AgentStatus::Terminated => agent,
            _ => return Err(CoordError::AgentNotFound(agent_id.to_string())),
        };

        tx.set_agent_status(&agent.agent_id, AgentStatus::Terminated)
            .await?;
        tx.set_agent_current_task(&agent.agent_id, None).await?;

        let released_claims = tx.release_claims_for(&agent.agent_id).await?;

        let mut reassigned_tasks = Vec::new();
        if reassign_tasks {
            for mut task in tx.tasks_assigned_to(&agent.agent_id).await? {
                task.assigned_to = None;
                if task.status == TaskStatus::InProgress {
                    task.status = TaskStatus::Pending;
                }
                task.updated_at = Utc::now();
                tx.update_task(&task).await?;
                reassigned_tasks.push(task.task_id);
            }
        }

        tx.append_action(&action_entry(
            &admin,
            ActionType::TerminateAgent,
            None,
            json!({
                "agent_id": agent.agent_id,
                "released_claims": released_claims,
                "reassigned_tasks": reassigned_tasks,
            }),
        ))
        .await?;

        Ok(TerminationReport {
            agent_id: agent.agent_id,
            released_claims,
            reassigned_tasks,
        })
    }

    /// Agent self-report: created -> active, or a refreshed active state,
    /// optionally updating what the agent is working on.
    pub async fn report_agent_status(&self, token: &str, report: StatusReport) -> Result<()> {
        let mut db = self.db.lock().await;
        with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.report_agent_status_in(&tx, token, &report).await;
                finish(tx, result).await
            }
            .await
        })
    }

    async fn report_agent_status_in(
        &self,
        tx: &Txn<'_>,
        token: &str,
        report: &StatusReport,
    ) -> Result<()> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;
        if identity.is_admin() {
            return Err(CoordError::InvalidInput(
                "admin has no agent status to report".to_string(),
            ));
        }

        let agent = tx
            .get_agent(&identity.agent_id)
            .await?
            .ok_or_else(|| CoordError::AgentNotFound(identity.agent_id.clone()))?;

        if !agent.status.can_self_report(report.status) {
            return Err(CoordError::InvalidTransition {
                from: agent.status.to_string(),
                to: report.status.to_string(),
            });
        }

        tx.set_agent_status(&agent.agent_id, report.status).await?;
        tx.set_agent_current_task(&agent.agent_id, report.current_task.as_deref())
            .await?;

        tx.append_action(&action_entry(
            &identity,
            ActionType::AgentStatusReport,
            report.current_task.as_deref(),
            json!({
                "status": report.status.to_string(),
                "current_task": report.current_task,
            }),
        ))
        .await?;
        Ok(())
    }

    /// Fetch one agent. The bearer token is never returned.
    pub async fn get_agent(&self, token: &str, agent_id: &str) -> Result<Agent> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;

        let mut agent = db
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| CoordError::AgentNotFound(agent_id.to_string()))?;
        agent.token = String::new();
        Ok(agent)
    }

    /// List all agents, tokens blanked.
    pub async fn list_agents(&self, token: &str) -> Result<Vec<Agent>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.list_agents().await?)
    }
}
