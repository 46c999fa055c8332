//! Repository for the append-only `audit_log` table.

use bankflow::Result;
use rusqlite::params;
use tracing::error;

use crate::db::{db_err, Database};
use crate::models::AuditEntry;
use crate::now_rfc3339;

#[derive(Clone)]
pub struct AuditRepo {
    db: Database,
}

impl AuditRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry. Best-effort: audit failures are logged, never
    /// propagated to the operation being audited.
    pub fn log(&self, action: &str, detail: &str, user: &str, entry_type: &str) {
        let result = self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO audit_log (action, detail, user, entry_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![action, detail, user, entry_type, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        });
        if let Err(e) = result {
            error!(action, error = %e, "Failed to write audit log");
        }
    }

    /// Convenience wrapper for system-attributed entries.
    pub fn record(&self, action: &str, detail: &str, entry_type: &str) {
        self.log(action, detail, "system", entry_type);
    }

    pub fn list_recent(&self, limit: usize, entry_type: Option<&str>) -> Result<Vec<AuditEntry>> {
        self.db.transaction(|tx| {
            let (sql, bind_type) = match entry_type {
                Some(_) => (
                    "SELECT id, action, detail, user, entry_type, created_at FROM audit_log
                     WHERE entry_type = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                    true,
                ),
                None => (
                    "SELECT id, action, detail, user, entry_type, created_at FROM audit_log
                     ORDER BY created_at DESC, id DESC LIMIT ?1",
                    false,
                ),
            };
            let mut stmt = tx.prepare(sql).map_err(db_err)?;
            let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<AuditEntry> {
                Ok(AuditEntry {
                    id: r.get(0)?,
                    action: r.get(1)?,
                    detail: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    user: r.get(3)?,
                    entry_type: r.get(4)?,
                    created_at: r.get(5)?,
                })
            };
            let rows = if bind_type {
                stmt.query_map(params![entry_type, limit as i64], map_row)
            } else {
                stmt.query_map(params![limit as i64], map_row)
            }
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
            Ok(rows)
        })
    }
}
