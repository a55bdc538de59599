//! SQLite-backed document store (sqlx).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{merge_patch, DocumentStore};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Documents in a single `documents` table.
///
/// Default location: `~/.local/state/fetchbot/documents.db`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the default store and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchbot")?;
        Self::open_at(xdg_dirs.get_state_home().join("documents.db")).await
    }

    /// Open (or create) the store at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await
            .with_context(|| format!("open document store {}", path.display()))?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store (no disk I/O). One connection so every query sees the same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(
                    serde_json::from_str(&body).with_context(|| format!("decode {path}"))?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, doc: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (path, body, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(doc.to_string())
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, path: &str, patch: &Value) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT body FROM documents WHERE path = ?1")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;
        let base = match row {
            Some(row) => {
                let body: String = row.get("body");
                Some(serde_json::from_str(&body).with_context(|| format!("decode {path}"))?)
            }
            None => None,
        };
        let merged = merge_patch(base, patch);
        sqlx::query(
            r#"
            INSERT INTO documents (path, body, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(merged.to_string())
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<u64> {
        // Byte-exact prefix match; LIKE would fold ASCII case.
        let result = sqlx::query(
            "DELETE FROM documents WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )
        .bind(path)
        .bind(format!("{path}/"))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let rows = sqlx::query(
            "SELECT path, body FROM documents WHERE substr(path, 1, length(?1)) = ?1 ORDER BY path",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let path: String = row.get("path");
            let body: String = row.get("body");
            match serde_json::from_str(&body) {
                Ok(doc) => out.push((path, doc)),
                Err(e) => tracing::warn!(path = %path, "skipping undecodable document: {}", e),
            }
        }
        Ok(out)
    }
}
