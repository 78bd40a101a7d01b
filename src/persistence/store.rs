//! SQLite-based play store

use crate::core::{Play, PlayKey};
use crate::persistence::{PlayStore, StoreError};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite play store
///
/// Plays are stored as JSON next to their resource version; updates are
/// conditional on the version so concurrent writers cannot overwrite each
/// other.
pub struct SqlitePlayStore {
    pool: SqlitePool,
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl SqlitePlayStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("stagehand");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(&db_dir.join("plays.db")).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plays (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                phase TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, name)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    fn decode(body: &str, version: i64) -> Result<Play, StoreError> {
        let mut play: Play = serde_json::from_str(body)?;
        play.metadata.resource_version = version as u64;
        Ok(play)
    }
}

#[async_trait::async_trait]
impl PlayStore for SqlitePlayStore {
    async fn create(&self, mut play: Play) -> Result<Play, StoreError> {
        play.metadata.resource_version = 1;
        let body = serde_json::to_string(&play)?;

        let result = sqlx::query(
            r#"
            INSERT INTO plays (namespace, name, version, phase, body, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(play.namespace())
        .bind(play.name())
        .bind(1_i64)
        .bind(play.status.phase.as_str())
        .bind(&body)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(play),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(play.key()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &PlayKey) -> Result<Option<Play>, StoreError> {
        let row = sqlx::query("SELECT version, body FROM plays WHERE namespace = ?1 AND name = ?2")
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::decode(&row.get::<String, _>("body"), row.get("version")))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Play>, StoreError> {
        let rows = sqlx::query("SELECT version, body FROM plays ORDER BY namespace, name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Self::decode(&row.get::<String, _>("body"), row.get("version")))
            .collect()
    }

    async fn update(&self, play: &Play) -> Result<Play, StoreError> {
        let expected = play.metadata.resource_version;
        let mut updated = play.clone();
        updated.metadata.resource_version = expected + 1;
        let body = serde_json::to_string(&updated)?;

        let result = sqlx::query(
            r#"
            UPDATE plays
            SET version = ?1, phase = ?2, body = ?3, updated_at = ?4
            WHERE namespace = ?5 AND name = ?6 AND version = ?7
            "#,
        )
        .bind(updated.metadata.resource_version as i64)
        .bind(updated.status.phase.as_str())
        .bind(&body)
        .bind(Utc::now().naive_utc())
        .bind(play.namespace())
        .bind(play.name())
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(updated);
        }

        let key = play.key();
        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM plays WHERE namespace = ?1 AND name = ?2")
                .bind(&key.namespace)
                .bind(&key.name)
                .fetch_optional(&self.pool)
                .await?;
        match actual {
            Some(actual) => Err(StoreError::Conflict {
                key,
                expected,
                actual: actual as u64,
            }),
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn delete(&self, key: &PlayKey) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM plays WHERE namespace = ?1 AND name = ?2")
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(())
    }
}
