use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::TargetStore;
use crate::config::DatabaseConfig;
use crate::core::hasher::Fingerprint;
use crate::models::MonitoredTarget;
use crate::utils::error::{AppError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS monitored_targets (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT,
    url TEXT NOT NULL,
    selector TEXT,
    active BOOLEAN NOT NULL DEFAULT 1,
    paused BOOLEAN NOT NULL DEFAULT 0,
    last_fingerprint TEXT,
    last_checked_at TEXT,
    last_new_content_at TEXT,
    new_listings_count INTEGER NOT NULL DEFAULT 0,
    total_checks INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

#[derive(Debug, FromRow)]
struct TargetRow {
    id: String,
    name: Option<String>,
    url: String,
    selector: Option<String>,
    active: bool,
    paused: bool,
    last_fingerprint: Option<String>,
    last_checked_at: Option<DateTime<Utc>>,
    last_new_content_at: Option<DateTime<Utc>>,
    new_listings_count: i64,
    total_checks: i64,
    error_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TargetRow> for MonitoredTarget {
    fn from(row: TargetRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            url: row.url,
            selector: row.selector,
            active: row.active,
            paused: row.paused,
            last_fingerprint: row.last_fingerprint.map(Fingerprint::from_hex),
            last_checked_at: row.last_checked_at,
            last_new_content_at: row.last_new_content_at,
            new_listings_count: row.new_listings_count.max(0) as u64,
            total_checks: row.total_checks.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = database_file(&config.url).and_then(|path| path.parent()) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url = %config.url, "Connected to target database");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn write(&self, target: &MonitoredTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_targets (
                id, name, url, selector, active, paused, last_fingerprint,
                last_checked_at, last_new_content_at, new_listings_count,
                total_checks, error_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                selector = excluded.selector,
                active = excluded.active,
                paused = excluded.paused,
                last_fingerprint = excluded.last_fingerprint,
                last_checked_at = excluded.last_checked_at,
                last_new_content_at = excluded.last_new_content_at,
                new_listings_count = excluded.new_listings_count,
                total_checks = excluded.total_checks,
                error_count = excluded.error_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&target.id)
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(target.active)
        .bind(target.paused)
        .bind(target.last_fingerprint.as_ref().map(|f| f.as_str().to_string()))
        .bind(target.last_checked_at)
        .bind(target.last_new_content_at)
        .bind(target.new_listings_count as i64)
        .bind(target.total_checks as i64)
        .bind(target.error_count as i64)
        .bind(target.created_at)
        .bind(target.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Filesystem path of a `sqlite:` url, if it names a file.
fn database_file(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(Path::new(path))
    }
}

#[async_trait]
impl TargetStore for SqliteStore {
    async fn load_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let rows: Vec<TargetRow> = sqlx::query_as("SELECT * FROM monitored_targets ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MonitoredTarget::from).collect())
    }

    async fn save_target_state(&self, target: &MonitoredTarget) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE monitored_targets SET
                last_fingerprint = ?,
                last_checked_at = ?,
                last_new_content_at = ?,
                new_listings_count = ?,
                total_checks = ?,
                error_count = ?,
                paused = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(target.last_fingerprint.as_ref().map(|f| f.as_str().to_string()))
        .bind(target.last_checked_at)
        .bind(target.last_new_content_at)
        .bind(target.new_listings_count as i64)
        .bind(target.total_checks as i64)
        .bind(target.error_count as i64)
        .bind(target.paused)
        .bind(Utc::now())
        .bind(&target.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: format!("target {}", target.id),
            });
        }
        Ok(())
    }

    async fn upsert_target(&self, target: &MonitoredTarget) -> Result<MonitoredTarget> {
        let stored = match self.get_target(&target.id).await? {
            Some(mut stored) => {
                stored.reconfigure(target);
                stored
            }
            None => target.clone(),
        };
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>> {
        let row: Option<TargetRow> = sqlx::query_as("SELECT * FROM monitored_targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(MonitoredTarget::from))
    }
}
