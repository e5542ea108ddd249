//! File claim manager: exclusive, path-normalized claims on workspace files.
//!
//! Claims are advisory mutual exclusion for concurrent editors. They are
//! independent of the task graph - holding a claim never blocks a task
//! transition and vice versa - but both are audited against the same agent
//! identity.

use chrono::Utc;
use roost_core::{
    normalize_claim_path, ActionType, AgentStatus, CoordError, FileClaim, Result, Role,
};
use roost_storage::Txn;
use serde_json::json;
use tracing::{info, warn};

use crate::coordinator::{action_entry, finish, with_busy_retry, Coordinator};

impl Coordinator {
    /// Claim exclusive access to a path.
    ///
    /// Fails with `Conflict` while another live agent holds the path.
    /// Re-claiming a path the caller already holds is a no-op success (and
    /// appends no audit entry, since nothing changed). A claim left behind
    /// by a terminated agent is reclaimed on the spot.
    pub async fn claim_file(&self, token: &str, path: &str) -> Result<FileClaim> {
        let normalized = normalize_claim_path(path)?;
        let mut db = self.db.lock().await;
        let claim = with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.claim_file_in(&tx, token, &normalized).await;
                finish(tx, result).await
            }
            .await
        })?;

        info!("{} holds {}", claim.holder, claim.path);
        Ok(claim)
    }

    async fn claim_file_in(&self, tx: &Txn<'_>, token: &str, path: &str) -> Result<FileClaim> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let mut reclaimed_from: Option<String> = None;
        if let Some(existing) = tx.get_claim(path).await? {
            if existing.holder == identity.agent_id {
                return Ok(existing);
            }

            // Claims from terminated agents are dead weight; reclaim them.
            let holder_live = match tx.get_agent(&existing.holder).await? {
                Some(agent) => agent.status != AgentStatus::Terminated,
                // "admin" has no agent row but is always live
                None => existing.holder == "admin",
            };
            if holder_live {
                return Err(CoordError::Conflict {
                    path: path.to_string(),
                    holder: existing.holder,
                });
            }

            warn!(
                "Reclaiming {} from terminated agent {}",
                path, existing.holder
            );
            tx.delete_claim(path).await?;
            reclaimed_from = Some(existing.holder);
        }

        let claim = FileClaim {
            path: path.to_string(),
            holder: identity.agent_id.clone(),
            claimed_at: Utc::now(),
        };
        tx.insert_claim(&claim).await?;

        tx.append_action(&action_entry(
            &identity,
            ActionType::ClaimFile,
            None,
            json!({
                "path": claim.path,
                "reclaimed_from": reclaimed_from,
            }),
        ))
        .await?;
        Ok(claim)
    }

    /// Release a claim on a path.
    ///
    /// Fails with `NotHeldByCaller` when another agent holds the path
    /// (admin may force-release). Releasing an unclaimed path is a no-op
    /// success, so release is safe to repeat.
    pub async fn release_file(&self, token: &str, path: &str) -> Result<()> {
        let normalized = normalize_claim_path(path)?;
        let mut db = self.db.lock().await;
        with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.release_file_in(&tx, token, &normalized).await;
                finish(tx, result).await
            }
            .await
        })
    }

    async fn release_file_in(&self, tx: &Txn<'_>, token: &str, path: &str) -> Result<()> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let existing = match tx.get_claim(path).await? {
            Some(claim) => claim,
            None => return Ok(()),
        };

        let forced = existing.holder != identity.agent_id;
        if forced && !identity.is_admin() {
            return Err(CoordError::NotHeldByCaller(path.to_string()));
        }

        tx.delete_claim(path).await?;
        tx.append_action(&action_entry(
            &identity,
            ActionType::ReleaseFile,
            None,
            json!({
                "path": path,
                "holder": existing.holder,
                "forced": forced,
            }),
        ))
        .await?;

        info!("{} released {}", identity.agent_id, path);
        Ok(())
    }

    /// List all live claims.
    pub async fn list_claims(&self, token: &str) -> Result<Vec<FileClaim>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.list_claims().await?)
    }
}
