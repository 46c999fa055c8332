//! Repository for the `integrations` table.
//!
//! Integration rows hold external-service connection config as JSON.
//! Secret-looking fields (passwords, tokens, keys) are encrypted in place
//! before they touch the database; `config_decrypted` reverses that for
//! connection tests. Legacy plaintext values survive both directions
//! because the cipher passes non-sentineled input through.

use std::collections::HashMap;
use std::sync::Arc;

use bankflow::core::crypto::Cipher;
use bankflow::{Error, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::{db_err, Database};
use crate::now_rfc3339;

/// Built-in integration catalog: id, display name, and the config fields
/// the admin UI renders. Field keys ending in a secret-ish suffix are
/// stored encrypted.
pub const INTEGRATION_DEFS: &[(&str, &str, &[&str])] = &[
    ("pg", "PostgreSQL", &["host", "port", "database", "username", "password", "ssl"]),
    ("mysql", "MySQL", &["host", "port", "database", "username", "password"]),
    ("mongo", "MongoDB", &["uri", "database", "collection"]),
    ("redis", "Redis", &["host", "port", "password", "dbIndex"]),
    ("snowflake", "Snowflake", &["account", "warehouse", "database", "schema", "user", "password"]),
    ("whatsapp", "WhatsApp Business", &["apiKey", "phoneId", "businessId"]),
    ("gmail", "Gmail", &["clientId", "clientSecret", "redirectUri"]),
    ("gdrive", "Google Drive", &["clientId", "clientSecret", "folderId"]),
    ("dropbox", "Dropbox", &["appKey", "appSecret", "accessToken"]),
    ("slack", "Slack", &["botToken", "signingSecret", "channel"]),
    ("restapi", "REST API", &["baseUrl", "authType", "headers"]),
    ("s3", "S3 / MinIO", &["endpoint", "bucket", "accessKey", "secretKey", "region"]),
];

const SECRET_SUFFIXES: &[&str] = &["password", "secret", "token", "apikey", "accesskey", "secretkey"];

fn is_secret_field(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Integration row merged with its catalog definition.
#[derive(Debug, Clone, Serialize)]
pub struct Integration {
    pub id: String,
    pub name: String,
    pub status: String,
    pub last_sync: Option<String>,
    pub updated_at: String,
    pub fields: Vec<String>,
    /// Config as stored: secret fields remain sentineled ciphertext.
    pub config: Map<String, Value>,
}

#[derive(Clone)]
pub struct IntegrationRepo {
    db: Database,
    cipher: Arc<Cipher>,
}

impl IntegrationRepo {
    pub fn new(db: Database, cipher: Arc<Cipher>) -> Self {
        Self { db, cipher }
    }

    /// Insert any catalog integrations missing from the table.
    pub fn ensure_seeded(&self) -> Result<()> {
        self.db.transaction(|tx| {
            for (id, name, _) in INTEGRATION_DEFS {
                tx.execute(
                    "INSERT OR IGNORE INTO integrations (id, name, status, created_at, updated_at)
                     VALUES (?1, ?2, 'disconnected', ?3, ?3)",
                    params![id, name, now_rfc3339()],
                )
                .map_err(db_err)?;
            }
            Ok(())
        })
    }

    pub fn list_all(&self) -> Result<Vec<Integration>> {
        self.ensure_seeded()?;
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT id, name, config_json, status, last_sync, updated_at
                     FROM integrations ORDER BY name",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            let mut out = Vec::with_capacity(rows.len());
            for (id, name, config_json, status, last_sync, updated_at) in rows {
                let config: Map<String, Value> =
                    serde_json::from_str(&config_json).unwrap_or_default();
                let fields = INTEGRATION_DEFS
                    .iter()
                    .find(|(def_id, _, _)| *def_id == id)
                    .map(|(_, _, fields)| fields.iter().map(|f| (*f).to_string()).collect())
                    .unwrap_or_default();
                out.push(Integration {
                    id,
                    name,
                    status,
                    last_sync,
                    updated_at,
                    fields,
                    config,
                });
            }
            Ok(out)
        })
    }

    /// Stored config with secret fields decrypted (for connection tests).
    pub fn config_decrypted(&self, integration_id: &str) -> Result<Map<String, Value>> {
        let config_json = self.db.transaction(|tx| {
            tx.query_row(
                "SELECT config_json FROM integrations WHERE id = ?1",
                params![integration_id],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)
        })?;
        let Some(config_json) = config_json else {
            return Err(Error::not_found(format!(
                "Integration {integration_id} not found"
            )));
        };

        let mut config: Map<String, Value> =
            serde_json::from_str(&config_json).unwrap_or_default();
        for (key, value) in config.iter_mut() {
            if let Value::String(s) = value {
                if is_secret_field(key) {
                    *s = self.cipher.decrypt(s);
                }
            }
        }
        Ok(config)
    }

    /// Save config, encrypting secret fields in place.
    pub fn upsert(&self, integration_id: &str, mut config: Map<String, Value>) -> Result<()> {
        self.ensure_seeded()?;
        for (key, value) in config.iter_mut() {
            if let Value::String(s) = value {
                if is_secret_field(key) && !s.is_empty() {
                    *s = self.cipher.encrypt(s);
                }
            }
        }
        let config_json = serde_json::to_string(&config)?;

        let affected = self.db.transaction(|tx| {
            tx.execute(
                "UPDATE integrations SET config_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![config_json, now_rfc3339(), integration_id],
            )
            .map_err(db_err)
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!(
                "Integration {integration_id} not found"
            )));
        }
        Ok(())
    }

    /// Update connection status, optionally stamping last_sync.
    pub fn update_status(
        &self,
        integration_id: &str,
        status: &str,
        last_sync: Option<&str>,
    ) -> Result<()> {
        let affected = self.db.transaction(|tx| {
            match last_sync {
                Some(sync) => tx
                    .execute(
                        "UPDATE integrations SET status = ?1, last_sync = ?2 WHERE id = ?3",
                        params![status, sync, integration_id],
                    )
                    .map_err(db_err),
                None => tx
                    .execute(
                        "UPDATE integrations SET status = ?1 WHERE id = ?2",
                        params![status, integration_id],
                    )
                    .map_err(db_err),
            }
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!(
                "Integration {integration_id} not found"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::init_admin_db;
    use serde_json::json;

    fn repo(dir: &tempfile::TempDir) -> IntegrationRepo {
        let db = Database::new(dir.path().join("admin.db"));
        init_admin_db(&db).unwrap();
        IntegrationRepo::new(db, Arc::new(Cipher::new([3u8; 32])))
    }

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_seeding() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let all = repo.list_all().unwrap();
        assert_eq!(all.len(), INTEGRATION_DEFS.len());
        assert!(all.iter().any(|i| i.id == "pg"));
        assert!(all.iter().all(|i| i.status == "disconnected"));
    }

    #[test]
    fn test_secret_fields_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.upsert(
            "pg",
            as_map(json!({"host": "db.internal", "password": "hunter2"})),
        )
        .unwrap();

        let stored = repo
            .list_all()
            .unwrap()
            .into_iter()
            .find(|i| i.id == "pg")
            .unwrap();
        let stored_password = stored.config.get("password").and_then(Value::as_str).unwrap();
        assert!(stored_password.starts_with("__ENCRYPTED__:"));
        assert_eq!(stored.config.get("host").and_then(Value::as_str), Some("db.internal"));

        let decrypted = repo.config_decrypted("pg").unwrap();
        assert_eq!(decrypted.get("password").and_then(Value::as_str), Some("hunter2"));
    }

    #[test]
    fn test_double_upsert_does_not_double_encrypt() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.upsert("redis", as_map(json!({"password": "s3cret"}))).unwrap();
        // Round-trip the stored (encrypted) config back through upsert.
        let stored = repo
            .list_all()
            .unwrap()
            .into_iter()
            .find(|i| i.id == "redis")
            .unwrap();
        repo.upsert("redis", stored.config).unwrap();

        let decrypted = repo.config_decrypted("redis").unwrap();
        assert_eq!(decrypted.get("password").and_then(Value::as_str), Some("s3cret"));
    }

    #[test]
    fn test_unknown_integration() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        assert!(matches!(
            repo.upsert("nope", Map::new()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            repo.config_decrypted("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_status_update() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.ensure_seeded().unwrap();
        repo.update_status("pg", "connected", Some("2026-08-01T09:00:00Z")).unwrap();
        let pg = repo
            .list_all()
            .unwrap()
            .into_iter()
            .find(|i| i.id == "pg")
            .unwrap();
        assert_eq!(pg.status, "connected");
        assert_eq!(pg.last_sync.as_deref(), Some("2026-08-01T09:00:00Z"));
    }
}
