//! SQLite-based target store

use crate::core::Target;
use crate::persistence::{TargetStore, TargetSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::marker::PhantomData;
use std::str::FromStr;

/// SQLite target store, one row per target, keyed by kind and name
pub struct SqliteTargetStore<T: Target> {
    pool: SqlitePool,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Target> SqliteTargetStore<T> {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// `:memory:` opens a private in-memory database.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // An in-memory database lives in one connection
        let max_connections = if db_path == ":memory:" { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self {
            pool,
            _kind: PhantomData,
        };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("provisioner");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("targets.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS targets (
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                phase TEXT NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, name)
            );

            CREATE INDEX IF NOT EXISTS idx_targets_phase ON targets(phase);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode(document: &str) -> Result<T> {
        serde_json::from_str(document).with_context(|| format!("Corrupt {} document", T::KIND))
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }
}

#[async_trait::async_trait]
impl<T: Target> TargetStore<T> for SqliteTargetStore<T> {
    async fn load(&self, name: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT document FROM targets WHERE kind = ?1 AND name = ?2")
            .bind(T::KIND)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load target")?;

        row.map(|row| Self::decode(&row.get::<String, _>("document")))
            .transpose()
    }

    async fn save(&self, target: &T) -> Result<()> {
        let document = serde_json::to_string(target)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO targets (kind, name, phase, document, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(T::KIND)
        .bind(target.name())
        .bind(target.phase().to_string())
        .bind(document)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await
        .context("Failed to save target")?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM targets WHERE kind = ?1 AND name = ?2")
            .bind(T::KIND)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to delete target")?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<TargetSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT document, updated_at
            FROM targets
            WHERE kind = ?1
            ORDER BY name ASC
            "#,
        )
        .bind(T::KIND)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list targets")?;

        rows.iter()
            .map(|row| {
                let target = Self::decode(&row.get::<String, _>("document"))?;
                let updated_at = Self::from_naive(row.get("updated_at"));
                Ok(TargetSummary::of(&target, updated_at))
            })
            .collect()
    }
}
