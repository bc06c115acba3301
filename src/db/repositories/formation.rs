//! Formation repository
//!
//! Database operations for training courses.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Formation;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait FormationRepository: Send + Sync {
    async fn create(&self, formation: &Formation) -> Result<Formation>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Formation>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Formation>>;

    /// List formations ordered by title
    async fn list(&self, active_only: bool, category: Option<&str>) -> Result<Vec<Formation>>;

    async fn update(&self, formation: &Formation) -> Result<Formation>;

    /// Returns false when no row was deleted
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Whether `slug` is taken by a formation other than `exclude_id`
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Number of sessions scheduled for this formation
    async fn count_sessions(&self, formation_id: i64) -> Result<i64>;

    /// (active, total)
    async fn counts(&self) -> Result<(i64, i64)>;
}

pub struct SqlxFormationRepository {
    pool: DynDatabasePool,
}

impl SqlxFormationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FormationRepository> {
        Arc::new(Self::new(pool))
    }
}

const FORMATION_COLUMNS: &str =
    "id, slug, title, description, duration, category, is_active, created_at, updated_at";

#[async_trait]
impl FormationRepository for SqlxFormationRepository {
    async fn create(&self, formation: &Formation) -> Result<Formation> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_formation_sqlite(self.pool.sqlite()?, formation).await,
            DatabaseDriver::Mysql => create_formation_mysql(self.pool.mysql()?, formation).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Formation>> {
        let sql = format!("SELECT {} FROM formations WHERE id = ?", FORMATION_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get formation by ID")?
                .as_ref()
                .map(row_to_formation_sqlite)
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get formation by ID")?
                .as_ref()
                .map(row_to_formation_mysql)
                .transpose(),
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Formation>> {
        let sql = format!("SELECT {} FROM formations WHERE slug = ?", FORMATION_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get formation by slug")?
                .as_ref()
                .map(row_to_formation_sqlite)
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get formation by slug")?
                .as_ref()
                .map(row_to_formation_mysql)
                .transpose(),
        }
    }

    async fn list(&self, active_only: bool, category: Option<&str>) -> Result<Vec<Formation>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_formations_sqlite(self.pool.sqlite()?, active_only, category).await
            }
            DatabaseDriver::Mysql => {
                list_formations_mysql(self.pool.mysql()?, active_only, category).await
            }
        }
    }

    async fn update(&self, formation: &Formation) -> Result<Formation> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_formation_sqlite(self.pool.sqlite()?, formation).await,
            DatabaseDriver::Mysql => update_formation_mysql(self.pool.mysql()?, formation).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM formations WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete formation")?;
        Ok(affected > 0)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM formations WHERE slug = ? AND id <> ?";
        let exclude = exclude_id.unwrap_or(0);
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to check formation slug")?;
        Ok(count > 0)
    }

    async fn count_sessions(&self, formation_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM training_sessions WHERE formation_id = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(formation_id)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(formation_id)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to count formation sessions")?;
        Ok(count)
    }

    async fn counts(&self) -> Result<(i64, i64)> {
        let sql = "SELECT COUNT(CASE WHEN is_active THEN 1 END) AS active, COUNT(*) AS total FROM formations";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(sql)
                    .fetch_one(self.pool.sqlite()?)
                    .await
                    .context("Failed to count formations")?;
                Ok((row.get("active"), row.get("total")))
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(sql)
                    .fetch_one(self.pool.mysql()?)
                    .await
                    .context("Failed to count formations")?;
                Ok((row.get("active"), row.get("total")))
            }
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_formation_sqlite(pool: &SqlitePool, formation: &Formation) -> Result<Formation> {
    let result = sqlx::query(
        r#"
        INSERT INTO formations (slug, title, description, duration, category, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&formation.slug)
    .bind(&formation.title)
    .bind(&formation.description)
    .bind(&formation.duration)
    .bind(&formation.category)
    .bind(formation.is_active)
    .bind(formation.created_at)
    .bind(formation.updated_at)
    .execute(pool)
    .await
    .context("Failed to create formation")?;

    Ok(Formation {
        id: result.last_insert_rowid(),
        ..formation.clone()
    })
}

async fn list_formations_sqlite(
    pool: &SqlitePool,
    active_only: bool,
    category: Option<&str>,
) -> Result<Vec<Formation>> {
    let sql = format!(
        "SELECT {} FROM formations WHERE (? = 0 OR is_active = 1) AND (? IS NULL OR category = ?) ORDER BY title",
        FORMATION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(active_only)
        .bind(category)
        .bind(category)
        .fetch_all(pool)
        .await
        .context("Failed to list formations")?;

    rows.iter().map(row_to_formation_sqlite).collect()
}

async fn update_formation_sqlite(pool: &SqlitePool, formation: &Formation) -> Result<Formation> {
    let now = chrono::Utc::now();
    sqlx::query(
        r#"
        UPDATE formations
        SET slug = ?, title = ?, description = ?, duration = ?, category = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&formation.slug)
    .bind(&formation.title)
    .bind(&formation.description)
    .bind(&formation.duration)
    .bind(&formation.category)
    .bind(formation.is_active)
    .bind(now)
    .bind(formation.id)
    .execute(pool)
    .await
    .context("Failed to update formation")?;

    Ok(Formation {
        updated_at: now,
        ..formation.clone()
    })
}

fn row_to_formation_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Formation> {
    Ok(Formation {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        description: row.get("description"),
        duration: row.get("duration"),
        category: row.get("category"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_formation_mysql(pool: &MySqlPool, formation: &Formation) -> Result<Formation> {
    let result = sqlx::query(
        r#"
        INSERT INTO formations (slug, title, description, duration, category, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&formation.slug)
    .bind(&formation.title)
    .bind(&formation.description)
    .bind(&formation.duration)
    .bind(&formation.category)
    .bind(formation.is_active)
    .bind(formation.created_at)
    .bind(formation.updated_at)
    .execute(pool)
    .await
    .context("Failed to create formation")?;

    Ok(Formation {
        id: result.last_insert_id() as i64,
        ..formation.clone()
    })
}

async fn list_formations_mysql(
    pool: &MySqlPool,
    active_only: bool,
    category: Option<&str>,
) -> Result<Vec<Formation>> {
    let sql = format!(
        "SELECT {} FROM formations WHERE (? = 0 OR is_active = 1) AND (? IS NULL OR category = ?) ORDER BY title",
        FORMATION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(active_only)
        .bind(category)
        .bind(category)
        .fetch_all(pool)
        .await
        .context("Failed to list formations")?;

    rows.iter().map(row_to_formation_mysql).collect()
}

async fn update_formation_mysql(pool: &MySqlPool, formation: &Formation) -> Result<Formation> {
    let now = chrono::Utc::now();
    sqlx::query(
        r#"
        UPDATE formations
        SET slug = ?, title = ?, description = ?, duration = ?, category = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&formation.slug)
    .bind(&formation.title)
    .bind(&formation.description)
    .bind(&formation.duration)
    .bind(&formation.category)
    .bind(formation.is_active)
    .bind(now)
    .bind(formation.id)
    .execute(pool)
    .await
    .context("Failed to update formation")?;

    Ok(Formation {
        updated_at: now,
        ..formation.clone()
    })
}

fn row_to_formation_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Formation> {
    Ok(Formation {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        description: row.get("description"),
        duration: row.get("duration"),
        category: row.get("category"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
