//! Audit log queries.
//!
//! Appends happen inside the transactions of the operations they describe
//! (see the other modules); this module only exposes the read side.

use roost_core::{ActionLogEntry, Result, Role};
use roost_storage::ActionFilter;

use crate::coordinator::Coordinator;

impl Coordinator {
    /// Query the action log, newest first.
    ///
    /// Entries are totally ordered by `(timestamp, insertion order)`; the
    /// log is never rewritten, so a repeated query with the same bounds is
    /// stable modulo new appends.
    pub async fn query_actions(
        &self,
        token: &str,
        filter: ActionFilter,
    ) -> Result<Vec<ActionLogEntry>> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.query_actions(filter).await?)
    }

    /// Total number of log entries. Mainly useful for diagnostics and
    /// audit-completeness checks.
    pub async fn count_actions(&self, token: &str) -> Result<i64> {
        let db = self.db.lock().await;
        self.identify(&db, token, Role::Agent).await?;
        Ok(db.count_actions().await?)
    }
}
