use crate::config::Config;
use crate::model::*;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase, Row};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_schema.sql", include_str!("migrations/001_schema.sql"))];

const SAVED_COLUMNS: &str =
    "wifi_id, wifi_json, origin_latitude, origin_longitude, origin_address, comment, saved_at";

const COMMENT_COLUMNS: &str = "id, wifi_id, parent_id, content, created_at, author_name";

#[derive(Debug)]
pub enum CommentOutcome {
    Created(WifiComment),
    ParentNotFound,
}

pub struct NewComment<'a> {
    pub wifi_id: &'a str,
    pub parent_id: Option<&'a str>,
    pub content: &'a str,
    pub author_name: &'a str,
}

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `comment-<unix millis>-<7 hex chars>`; the suffix hashes the author, target and time.
pub fn new_comment_id(user_id: &str, wifi_id: &str, content: &str) -> String {
    let now = Utc::now();
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(wifi_id.as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("comment-{}-{}", now.timestamp_millis(), &digest[..7])
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    async fn open(db: LibsqlDatabase, turso_url: Option<String>, turso_auth_token: Option<String>) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            tx_lock: Mutex::new(()),
            turso_url,
            turso_auth_token,
        })
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone().filter(|url| !url.is_empty());
        let turso_auth_token = cfg.app.turso_auth_token.clone().filter(|token| !token.is_empty());

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => {
                tracing::info!("[db] using local database at {}", path.display());
                Builder::new_local(&path).build().await?
            }
        };

        Self::open(db, turso_url, turso_auth_token).await
    }

    pub async fn in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::open(db, None, None).await
    }

    fn saved_from_row(row: &Row) -> Result<SavedWifiEntry> {
        let wifi_id: String = row.get(0)?;
        let wifi_json: String = row.get(1)?;
        let wifi: WifiPoint = serde_json::from_str(&wifi_json)
            .map_err(|e| anyhow::anyhow!("corrupt saved wifi {}: {}", wifi_id, e))?;

        Ok(SavedWifiEntry {
            id: wifi_id,
            wifi,
            origin: Location {
                latitude: row.get(2)?,
                longitude: row.get(3)?,
                address: row.get::<Option<String>>(4)?,
            },
            comment: row.get::<Option<String>>(5)?,
            saved_at: row.get(6)?,
        })
    }

    fn comment_from_row(row: &Row) -> Result<WifiComment> {
        Ok(WifiComment {
            id: row.get(0)?,
            wifi_id: row.get(1)?,
            parent_id: row.get::<Option<String>>(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            author_name: row
                .get::<Option<String>>(5)?
                .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
        })
    }

    pub async fn list_saved(&self, user_id: &str) -> Result<Vec<SavedWifiEntry>> {
        let query = format!(
            "SELECT {} FROM saved_wifi WHERE user_id = ? ORDER BY saved_at ASC, wifi_id ASC",
            SAVED_COLUMNS
        );
        let mut rows = self.conn.query(&query, libsql::params![user_id]).await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::saved_from_row(&row)?);
        }
        Ok(entries)
    }

    pub async fn get_saved(&self, user_id: &str, wifi_id: &str) -> Result<Option<SavedWifiEntry>> {
        let query = format!(
            "SELECT {} FROM saved_wifi WHERE user_id = ? AND wifi_id = ?",
            SAVED_COLUMNS
        );
        let mut rows = self.conn.query(&query, libsql::params![user_id, wifi_id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::saved_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Upserts by `(user, wifi id)`; a re-save replaces the entry and its `saved_at`.
    pub async fn save_wifi(
        &self,
        user_id: &str,
        wifi: &WifiPoint,
        origin: &Location,
        comment: Option<&str>,
    ) -> Result<SavedWifiEntry> {
        let wifi_json = serde_json::to_string(wifi)?;
        let query = r#"
            INSERT INTO saved_wifi
                (user_id, wifi_id, wifi_json, origin_latitude, origin_longitude, origin_address, comment, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, wifi_id) DO UPDATE SET
                wifi_json = excluded.wifi_json,
                origin_latitude = excluded.origin_latitude,
                origin_longitude = excluded.origin_longitude,
                origin_address = excluded.origin_address,
                comment = excluded.comment,
                saved_at = excluded.saved_at
        "#;

        self.conn
            .execute(
                query,
                libsql::params![
                    user_id,
                    wifi.id.as_str(),
                    wifi_json,
                    origin.latitude,
                    origin.longitude,
                    origin.address.as_deref(),
                    comment,
                    now_timestamp()
                ],
            )
            .await?;

        match self.get_saved(user_id, &wifi.id).await? {
            Some(entry) => Ok(entry),
            None => anyhow::bail!("Failed to save wifi {}", wifi.id),
        }
    }

    pub async fn remove_saved(&self, user_id: &str, wifi_id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM saved_wifi WHERE user_id = ? AND wifi_id = ?",
                libsql::params![user_id, wifi_id],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn clear_saved(&self, user_id: &str) -> Result<u64> {
        let affected = self
            .conn
            .execute("DELETE FROM saved_wifi WHERE user_id = ?", libsql::params![user_id])
            .await?;
        Ok(affected)
    }

    pub async fn get_comment(&self, comment_id: &str) -> Result<Option<WifiComment>> {
        let query = format!("SELECT {} FROM wifi_comments WHERE id = ?", COMMENT_COLUMNS);
        let mut rows = self.conn.query(&query, libsql::params![comment_id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::comment_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_comments(&self, wifi_id: &str) -> Result<Vec<WifiComment>> {
        let query = format!(
            "SELECT {} FROM wifi_comments WHERE wifi_id = ? ORDER BY created_at ASC, rowid ASC",
            COMMENT_COLUMNS
        );
        let mut rows = self.conn.query(&query, libsql::params![wifi_id]).await?;

        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(Self::comment_from_row(&row)?);
        }
        Ok(comments)
    }

    /// A reply must point at an existing comment on the same wifi point.
    pub async fn add_comment(&self, user_id: &str, comment: NewComment<'_>) -> Result<CommentOutcome> {
        let _guard = self.tx_lock.lock().await;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        match self.add_comment_internal(user_id, comment).await {
            Ok(outcome @ CommentOutcome::Created(_)) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(outcome)
            }
            Ok(outcome) => {
                let _ = self.conn.execute("ROLLBACK", ()).await;
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn add_comment_internal(&self, user_id: &str, comment: NewComment<'_>) -> Result<CommentOutcome> {
        if let Some(parent_id) = comment.parent_id {
            match self.get_comment(parent_id).await? {
                Some(parent) if parent.wifi_id == comment.wifi_id => {}
                _ => return Ok(CommentOutcome::ParentNotFound),
            }
        }

        let created = WifiComment {
            id: new_comment_id(user_id, comment.wifi_id, comment.content),
            wifi_id: comment.wifi_id.to_string(),
            parent_id: comment.parent_id.map(|p| p.to_string()),
            content: comment.content.to_string(),
            created_at: now_timestamp(),
            author_name: comment.author_name.to_string(),
        };

        let insert = r#"
            INSERT INTO wifi_comments (id, user_id, wifi_id, parent_id, content, author_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        self.conn
            .execute(
                insert,
                libsql::params![
                    created.id.as_str(),
                    user_id,
                    created.wifi_id.as_str(),
                    created.parent_id.as_deref(),
                    created.content.as_str(),
                    created.author_name.as_str(),
                    created.created_at.as_str()
                ],
            )
            .await?;

        Ok(CommentOutcome::Created(created))
    }

    pub async fn comment_counts(&self) -> Result<BTreeMap<String, i64>> {
        let mut rows = self
            .conn
            .query("SELECT wifi_id, COUNT(*) FROM wifi_comments GROUP BY wifi_id", ())
            .await?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next().await? {
            let wifi_id: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(wifi_id, count);
        }
        Ok(counts)
    }
}
