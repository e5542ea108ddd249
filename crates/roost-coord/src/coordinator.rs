//! The coordination node shared by all agent processes.
//!
//! A [`Coordinator`] owns the database and the per-process admin token.
//! Every mutating operation runs as one storage transaction: identity check,
//! read-modify-write, and audit append commit together or roll back
//! together. Writes are serialized through a single connection behind an
//! async mutex, so two agents racing on the same row never both succeed.

use chrono::Utc;
use roost_core::{
    ActionLogEntry, ActionType, AgentStatus, CoordConfig, CoordError, Identity, Result, Role,
};
use roost_storage::{Database, Txn};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Retry a transactional operation on transient lock contention.
///
/// The body is re-evaluated on each attempt; past the configured bound the
/// Busy error is surfaced to the caller, which owns backoff from there.
macro_rules! with_busy_retry {
    ($config:expr, $body:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            match $body {
                Err(roost_core::CoordError::Busy) if attempt < $config.busy_retries => {
                    attempt += 1;
                    tracing::warn!("storage busy, retrying (attempt {})", attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(
                        $config.busy_backoff_ms,
                    ))
                    .await;
                }
                other => break other,
            }
        }
    }};
}
pub(crate) use with_busy_retry;

/// The single authoritative coordination node.
pub struct Coordinator {
    pub(crate) db: Mutex<Database>,
    pub(crate) config: CoordConfig,
    admin_token: String,
}

impl Coordinator {
    /// Open (or create) the coordination database and mint the admin token.
    pub async fn open(config: CoordConfig) -> Result<Self> {
        let db = Database::open(&config.database_path).await?;
        db.init_schema().await?;

        let admin_token = match &config.admin_token {
            Some(token) => token.clone(),
            None => new_token(),
        };

        info!("Coordinator ready at {}", db.path());

        Ok(Coordinator {
            db: Mutex::new(db),
            config,
            admin_token,
        })
    }

    /// The single admin bearer token for this process.
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Verify a bearer token against a required role.
    ///
    /// The admin token satisfies both roles. Agent tokens satisfy `agent`
    /// while the agent is not terminated. Unknown, terminated, and
    /// under-privileged tokens all yield the same `Unauthorized` so callers
    /// cannot probe whether a token ever existed.
    pub async fn verify_token(&self, token: &str, required: Role) -> Result<Identity> {
        let db = self.db.lock().await;
        self.identify(&db, token, required).await
    }

    /// Read-path identity resolution against committed state.
    pub(crate) async fn identify(
        &self,
        db: &Database,
        token: &str,
        required: Role,
    ) -> Result<Identity> {
        if token == self.admin_token {
            return Ok(Identity {
                agent_id: "admin".to_string(),
                role: Role::Admin,
            });
        }
        if required == Role::Admin {
            return Err(CoordError::Unauthorized);
        }
        match db.get_agent_by_token(token).await? {
            Some(agent) if agent.status != AgentStatus::Terminated => Ok(Identity {
                agent_id: agent.agent_id,
                role: Role::Agent,
            }),
            _ => Err(CoordError::Unauthorized),
        }
    }

    /// Identity resolution inside a write transaction. Mutating operations
    /// use this so a concurrent termination cannot slip between the token
    /// check and the commit.
    pub(crate) async fn identify_tx(
        &self,
        tx: &Txn<'_>,
        token: &str,
        required: Role,
    ) -> Result<Identity> {
        if token == self.admin_token {
            return Ok(Identity {
                agent_id: "admin".to_string(),
                role: Role::Admin,
            });
        }
        if required == Role::Admin {
            return Err(CoordError::Unauthorized);
        }
        match tx.get_agent_by_token(token).await? {
            Some(agent) if agent.status != AgentStatus::Terminated => Ok(Identity {
                agent_id: agent.agent_id,
                role: Role::Agent,
            }),
            _ => Err(CoordError::Unauthorized),
        }
    }
}

/// Commit the transaction on success, roll it back on error.
///
/// A dropped transaction is only rolled back lazily by the next statement
/// on the shared connection, which then fails on it; every operation ends
/// its transaction through here so error paths release the connection
/// immediately. The rollback error (if any) is dropped in favor of the
/// error that caused it.
pub(crate) async fn finish<T>(tx: Txn<'_>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

/// Build an audit entry for the given actor.
pub(crate) fn action_entry(
    actor: &Identity,
    action_type: ActionType,
    task_id: Option<&str>,
    details: serde_json::Value,
) -> ActionLogEntry {
    ActionLogEntry {
        id: 0,
        timestamp: Utc::now(),
        agent_id: actor.agent_id.clone(),
        action_type,
        task_id: task_id.map(|s| s.to_string()),
        details,
    }
}

/// Mint an opaque bearer token.
pub(crate) fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}
