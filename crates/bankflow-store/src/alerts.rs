//! Repository for the `alerts` table.

use bankflow::{Error, Result};
use rusqlite::{params, Row};
use serde_json::Value;

use crate::db::{db_err, Database};
use crate::models::Alert;
use crate::now_rfc3339;

/// Partial update payload for an alert rule.
#[derive(Debug, Default, Clone)]
pub struct AlertUpdate {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub threshold: Option<f64>,
    pub operator: Option<String>,
    pub uc_id: Option<String>,
    pub severity: Option<String>,
    pub enabled: Option<bool>,
}

fn alert_from_row(r: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: r.get(0)?,
        name: r.get(1)?,
        metric: r.get(2)?,
        threshold: r.get(3)?,
        operator: r.get(4)?,
        uc_id: r.get(5)?,
        severity: r.get(6)?,
        enabled: r.get::<_, i64>(7)? != 0,
        last_triggered: r.get(8)?,
        created_at: r.get(9)?,
    })
}

const ALERT_COLUMNS: &str =
    "id, name, metric, threshold, operator, uc_id, severity, enabled, last_triggered, created_at";

#[derive(Clone)]
pub struct AlertRepo {
    db: Database,
}

impl AlertRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_all(&self) -> Result<Vec<Alert>> {
        self.query_alerts(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts ORDER BY created_at DESC, id DESC"
        ))
    }

    pub fn list_enabled(&self) -> Result<Vec<Alert>> {
        self.query_alerts(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE enabled = 1 ORDER BY id"
        ))
    }

    fn query_alerts(&self, sql: &str) -> Result<Vec<Alert>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare(sql).map_err(db_err)?;
            let rows = stmt
                .query_map([], alert_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn create(
        &self,
        name: &str,
        metric: &str,
        threshold: f64,
        operator: &str,
        uc_id: &str,
        severity: &str,
    ) -> Result<i64> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO alerts (name, metric, threshold, operator, uc_id, severity, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                params![name, metric, threshold, operator, uc_id, severity, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// `Validation` when no fields are set, `NotFound` when the id is gone.
    pub fn update(&self, alert_id: i64, update: &AlertUpdate) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(v) = &update.name {
            sets.push("name = ?");
            values.push(Value::String(v.clone()));
        }
        if let Some(v) = &update.metric {
            sets.push("metric = ?");
            values.push(Value::String(v.clone()));
        }
        if let Some(v) = update.threshold {
            sets.push("threshold = ?");
            values.push(Value::from(v));
        }
        if let Some(v) = &update.operator {
            sets.push("operator = ?");
            values.push(Value::String(v.clone()));
        }
        if let Some(v) = &update.uc_id {
            sets.push("uc_id = ?");
            values.push(Value::String(v.clone()));
        }
        if let Some(v) = &update.severity {
            sets.push("severity = ?");
            values.push(Value::String(v.clone()));
        }
        if let Some(v) = update.enabled {
            sets.push("enabled = ?");
            values.push(Value::from(i64::from(v)));
        }

        if sets.is_empty() {
            return Err(Error::validation("No fields to update"));
        }

        let sql = format!("UPDATE alerts SET {} WHERE id = ?", sets.join(", "));
        let affected = self.db.transaction(|tx| {
            let mut stmt = tx.prepare(&sql).map_err(db_err)?;
            let mut index = 1;
            for value in &values {
                match value {
                    Value::String(s) => stmt.raw_bind_parameter(index, s).map_err(db_err)?,
                    Value::Number(n) if n.is_i64() => stmt
                        .raw_bind_parameter(index, n.as_i64().unwrap_or(0))
                        .map_err(db_err)?,
                    Value::Number(n) => stmt
                        .raw_bind_parameter(index, n.as_f64().unwrap_or(0.0))
                        .map_err(db_err)?,
                    _ => {}
                }
                index += 1;
            }
            stmt.raw_bind_parameter(index, alert_id).map_err(db_err)?;
            stmt.raw_execute().map_err(db_err)
        })?;

        if affected == 0 {
            return Err(Error::not_found(format!("Alert {alert_id} not found")));
        }
        Ok(())
    }

    pub fn delete(&self, alert_id: i64) -> Result<()> {
        let affected = self.db.transaction(|tx| {
            tx.execute("DELETE FROM alerts WHERE id = ?1", params![alert_id])
                .map_err(db_err)
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!("Alert {alert_id} not found")));
        }
        Ok(())
    }

    pub fn update_last_triggered(&self, alert_ids: &[i64], timestamp: &str) -> Result<()> {
        self.db.transaction(|tx| {
            for id in alert_ids {
                tx.execute(
                    "UPDATE alerts SET last_triggered = ?1 WHERE id = ?2",
                    params![timestamp, id],
                )
                .map_err(db_err)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::init_admin_db;

    fn repo(dir: &tempfile::TempDir) -> AlertRepo {
        let db = Database::new(dir.path().join("admin.db"));
        init_admin_db(&db).unwrap();
        AlertRepo::new(db)
    }

    #[test]
    fn test_create_list_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo
            .create("low accuracy", "accuracy", 0.8, "<", "all", "warning")
            .unwrap();
        assert!(id > 0);
        let enabled = repo.list_enabled().unwrap();
        assert_eq!(enabled.len(), 1);
        assert!(enabled[0].enabled);
        assert_eq!(enabled[0].operator, "<");
    }

    #[test]
    fn test_update_partial() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo
            .create("rule", "data_quality_score", 80.0, "<", "all", "warning")
            .unwrap();

        repo.update(
            id,
            &AlertUpdate {
                threshold: Some(90.0),
                severity: Some("critical".to_string()),
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let all = repo.list_all().unwrap();
        assert!((all[0].threshold - 90.0).abs() < f64::EPSILON);
        assert_eq!(all[0].severity, "critical");
        assert!(!all[0].enabled);
        assert!(repo.list_enabled().unwrap().is_empty());
    }

    #[test]
    fn test_update_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        assert!(matches!(
            repo.update(1, &AlertUpdate::default()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            repo.update(
                42,
                &AlertUpdate {
                    threshold: Some(1.0),
                    ..Default::default()
                }
            ),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo.create("r", "accuracy", 0.5, ">", "all", "info").unwrap();
        repo.delete(id).unwrap();
        assert!(matches!(repo.delete(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_last_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo.create("r", "accuracy", 0.5, "<", "all", "info").unwrap();
        repo.update_last_triggered(&[id], "2026-08-01T10:00:00Z").unwrap();
        let all = repo.list_all().unwrap();
        assert_eq!(all[0].last_triggered.as_deref(), Some("2026-08-01T10:00:00Z"));
    }
}
