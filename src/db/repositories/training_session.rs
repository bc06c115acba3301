//! Training session repository
//!
//! Sessions are dated offerings of a formation. `current_participants` is
//! owned by the registration repository and never written here.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{SessionWithFormation, TrainingSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait TrainingSessionRepository: Send + Sync {
    async fn create(&self, session: &TrainingSession) -> Result<TrainingSession>;

    async fn get_by_id(&self, id: i64) -> Result<Option<TrainingSession>>;

    /// Session joined with its formation
    async fn get_with_formation(&self, id: i64) -> Result<Option<SessionWithFormation>>;

    /// All sessions, optionally of one formation, by start date
    async fn list(&self, formation_id: Option<i64>) -> Result<Vec<TrainingSession>>;

    /// Open sessions of active formations starting on or after `from`
    async fn list_upcoming(
        &self,
        from: NaiveDate,
        formation_id: Option<i64>,
    ) -> Result<Vec<SessionWithFormation>>;

    /// Update everything but the participant counter.
    ///
    /// Returns false when the row is missing or when the new capacity would
    /// fall below the participants already registered.
    async fn update(&self, session: &TrainingSession) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Registrations of the session that are not cancelled
    async fn count_active_registrations(&self, session_id: i64) -> Result<i64>;

    async fn count_upcoming(&self, from: NaiveDate) -> Result<i64>;
}

pub struct SqlxTrainingSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxTrainingSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TrainingSessionRepository> {
        Arc::new(Self::new(pool))
    }
}

const SESSION_COLUMNS: &str = "s.id, s.formation_id, s.start_date, s.end_date, s.location, \
    s.max_participants, s.current_participants, s.price_eur, s.price_chf, s.is_open, \
    s.created_at, s.updated_at";

const UPDATE_SESSION_SQL: &str = r#"
    UPDATE training_sessions
    SET formation_id = ?, start_date = ?, end_date = ?, location = ?, max_participants = ?,
        price_eur = ?, price_chf = ?, is_open = ?, updated_at = ?
    WHERE id = ? AND current_participants <= ?
"#;

const INSERT_SESSION_SQL: &str = r#"
    INSERT INTO training_sessions
        (formation_id, start_date, end_date, location, max_participants, current_participants,
         price_eur, price_chf, is_open, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl TrainingSessionRepository for SqlxTrainingSessionRepository {
    async fn create(&self, session: &TrainingSession) -> Result<TrainingSession> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.pool.sqlite()?, session).await?,
            DatabaseDriver::Mysql => create_session_mysql(self.pool.mysql()?, session).await?,
        };
        Ok(TrainingSession {
            id,
            current_participants: 0,
            ..session.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<TrainingSession>> {
        let sql = format!("SELECT {} FROM training_sessions s WHERE s.id = ?", SESSION_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get session by ID")?
                .as_ref()
                .map(row_to_session_sqlite)
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get session by ID")?
                .as_ref()
                .map(row_to_session_mysql)
                .transpose(),
        }
    }

    async fn get_with_formation(&self, id: i64) -> Result<Option<SessionWithFormation>> {
        let sql = format!(
            "SELECT {}, f.slug AS formation_slug, f.title AS formation_title \
             FROM training_sessions s JOIN formations f ON f.id = s.formation_id \
             WHERE s.id = ?",
            SESSION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get session with formation")?
                .as_ref()
                .map(row_to_joined_sqlite)
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get session with formation")?
                .as_ref()
                .map(row_to_joined_mysql)
                .transpose(),
        }
    }

    async fn list(&self, formation_id: Option<i64>) -> Result<Vec<TrainingSession>> {
        let sql = format!(
            "SELECT {} FROM training_sessions s WHERE (? IS NULL OR s.formation_id = ?) \
             ORDER BY s.start_date, s.id",
            SESSION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(formation_id)
                .bind(formation_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list sessions")?
                .iter()
                .map(row_to_session_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(formation_id)
                .bind(formation_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list sessions")?
                .iter()
                .map(row_to_session_mysql)
                .collect(),
        }
    }

    async fn list_upcoming(
        &self,
        from: NaiveDate,
        formation_id: Option<i64>,
    ) -> Result<Vec<SessionWithFormation>> {
        let sql = format!(
            "SELECT {}, f.slug AS formation_slug, f.title AS formation_title \
             FROM training_sessions s JOIN formations f ON f.id = s.formation_id \
             WHERE s.is_open = 1 AND f.is_active = 1 AND s.start_date >= ? \
             AND (? IS NULL OR s.formation_id = ?) \
             ORDER BY s.start_date, s.id",
            SESSION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(from)
                .bind(formation_id)
                .bind(formation_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list upcoming sessions")?
                .iter()
                .map(row_to_joined_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(from)
                .bind(formation_id)
                .bind(formation_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list upcoming sessions")?
                .iter()
                .map(row_to_joined_mysql)
                .collect(),
        }
    }

    async fn update(&self, session: &TrainingSession) -> Result<bool> {
        let now = chrono::Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(UPDATE_SESSION_SQL)
                .bind(session.formation_id)
                .bind(session.start_date)
                .bind(session.end_date)
                .bind(&session.location)
                .bind(session.max_participants)
                .bind(session.price_eur)
                .bind(session.price_chf)
                .bind(session.is_open)
                .bind(now)
                .bind(session.id)
                .bind(session.max_participants)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(UPDATE_SESSION_SQL)
                .bind(session.formation_id)
                .bind(session.start_date)
                .bind(session.end_date)
                .bind(&session.location)
                .bind(session.max_participants)
                .bind(session.price_eur)
                .bind(session.price_chf)
                .bind(session.is_open)
                .bind(now)
                .bind(session.id)
                .bind(session.max_participants)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to update session")?;
        Ok(affected > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM training_sessions WHERE id = ?";
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
        .context("Failed to delete session")?;
        Ok(affected > 0)
    }

    async fn count_active_registrations(&self, session_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM registrations WHERE session_id = ? AND status <> 'cancelled'";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(session_id)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(session_id)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to count session registrations")?;
        Ok(count)
    }

    async fn count_upcoming(&self, from: NaiveDate) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM training_sessions WHERE start_date >= ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(from)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(from)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to count upcoming sessions")?;
        Ok(count)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &TrainingSession) -> Result<i64> {
    let result = sqlx::query(INSERT_SESSION_SQL)
        .bind(session.formation_id)
        .bind(session.start_date)
        .bind(session.end_date)
        .bind(&session.location)
        .bind(session.max_participants)
        .bind(session.price_eur)
        .bind(session.price_chf)
        .bind(session.is_open)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;
    Ok(result.last_insert_rowid())
}

pub(crate) fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<TrainingSession> {
    Ok(TrainingSession {
        id: row.get("id"),
        formation_id: row.get("formation_id"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        location: row.get("location"),
        max_participants: row.get("max_participants"),
        current_participants: row.get("current_participants"),
        price_eur: row.get("price_eur"),
        price_chf: row.get("price_chf"),
        is_open: row.get("is_open"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_joined_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<SessionWithFormation> {
    let session = row_to_session_sqlite(row)?;
    Ok(SessionWithFormation {
        seats_left: session.seats_left(),
        session,
        formation_slug: row.get("formation_slug"),
        formation_title: row.get("formation_title"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &TrainingSession) -> Result<i64> {
    let result = sqlx::query(INSERT_SESSION_SQL)
        .bind(session.formation_id)
        .bind(session.start_date)
        .bind(session.end_date)
        .bind(&session.location)
        .bind(session.max_participants)
        .bind(session.price_eur)
        .bind(session.price_chf)
        .bind(session.is_open)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;
    Ok(result.last_insert_id() as i64)
}

pub(crate) fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<TrainingSession> {
    Ok(TrainingSession {
        id: row.get("id"),
        formation_id: row.get("formation_id"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        location: row.get("location"),
        max_participants: row.get("max_participants"),
        current_participants: row.get("current_participants"),
        price_eur: row.get("price_eur"),
        price_chf: row.get("price_chf"),
        is_open: row.get("is_open"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_joined_mysql(row: &sqlx::mysql::MySqlRow) -> Result<SessionWithFormation> {
    let session = row_to_session_mysql(row)?;
    Ok(SessionWithFormation {
        seats_left: session.seats_left(),
        session,
        formation_slug: row.get("formation_slug"),
        formation_title: row.get("formation_title"),
    })
}
