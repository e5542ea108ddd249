//! Shared context store: versioned key/value memory visible to all agents.

use chrono::Utc;
use roost_core::{ActionType, ContextEntry, CoordError, Result, Role};
use roost_storage::Txn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::coordinator::{action_entry, finish, with_busy_retry, Coordinator};

/// Parameters for writing a context key.
///
/// Partial-update semantics mirror task patches: only provided fields are
/// overwritten, but `updated_by`/`last_updated` are always stamped together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetContext {
    /// New value. Required when the key does not exist yet.
    pub value: Option<serde_json::Value>,
    pub description: Option<String>,
    /// When set, fail with `AlreadyExists` instead of updating an existing
    /// key. This is how the API layer distinguishes create from update.
    pub create_only: bool,
}

impl Coordinator {
    /// Read one context entry.
    pub async fn get_context(&self, token: &str, key: &str) -> Result<ContextEntry> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        db.get_context(key)
            .await?
            .ok_or_else(|| CoordError::ContextNotFound(key.to_string()))
    }

    /// Create or update a context entry (last writer wins).
    pub async fn set_context(&self, token: &str, key: &str, req: SetContext) -> Result<ContextEntry> {
        if key.is_empty() {
            return Err(CoordError::InvalidInput(
                "context_key is required".to_string(),
            ));
        }

        let mut db = self.db.lock().await;
        with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.set_context_in(&tx, token, key, &req).await;
                finish(tx, result).await
            }
            .await
        })
    }

    async fn set_context_in(
        &self,
        tx: &Txn<'_>,
        token: &str,
        key: &str,
        req: &SetContext,
    ) -> Result<ContextEntry> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        let existing = tx.get_context(key).await?;
        let created = existing.is_none();

        let entry = match existing {
            Some(mut entry) => {
                if req.create_only {
                    return Err(CoordError::AlreadyExists(format!("context key {}", key)));
                }
                if let Some(value) = &req.value {
                    entry.value = value.clone();
                }
                if let Some(description) = &req.description {
                    entry.description = Some(description.clone());
                }
                entry.updated_by = identity.agent_id.clone();
                entry.last_updated = Utc::now();
                entry
            }
            None => {
                let value = req.value.clone().ok_or_else(|| {
                    CoordError::InvalidInput(format!("value is required to create key {}", key))
                })?;
                ContextEntry {
                    context_key: key.to_string(),
                    value,
                    description: req.description.clone(),
                    updated_by: identity.agent_id.clone(),
                    last_updated: Utc::now(),
                }
            }
        };

        tx.upsert_context(&entry).await?;
        tx.append_action(&action_entry(
            &identity,
            ActionType::UpdateContext,
            None,
            json!({
                "context_key": key,
                "created": created,
                "value_changed": req.value.is_some(),
                "description_changed": req.description.is_some(),
            }),
        ))
        .await?;
        Ok(entry)
    }

    /// Hard-delete a context key. The deletion itself is logged, so the
    /// audit trail survives the entry.
    pub async fn delete_context(&self, token: &str, key: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        with_busy_retry!(self.config, {
            async {
                let tx = db.begin().await?;
                let result = self.delete_context_in(&tx, token, key).await;
                finish(tx, result).await
            }
            .await
        })
    }

    async fn delete_context_in(&self, tx: &Txn<'_>, token: &str, key: &str) -> Result<()> {
        let identity = self.identify_tx(tx, token, Role::Agent).await?;

        if tx.get_context(key).await?.is_none() {
            return Err(CoordError::ContextNotFound(key.to_string()));
        }

        tx.delete_context(key).await?;
        tx.append_action(&action_entry(
            &identity,
            ActionType::DeleteContext,
            None,
            json!({ "context_key": key }),
        ))
        .await?;
        Ok(())
    }

    /// List all context entries, most recently updated first.
    pub async fn list_context(&self, token: &str) -> Result<Vec<ContextEntry>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.list_context().await?)
    }
}
