//! Registration repository
//!
//! Every write that changes whether a registration holds a seat runs in one
//! transaction together with the matching `current_participants` update.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    Currency, NewRegistration, PaymentMethod, PaymentStatus, Registration, RegistrationDetail,
    RegistrationFilter, RegistrationStatus,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// Result of trying to reserve a seat
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Created(Registration),
    SessionNotFound,
    SessionClosed,
    SessionFull,
}

/// Aggregates for the admin dashboard
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationStats {
    pub pending: i64,
    pub confirmed: i64,
    pub cancelled: i64,
    /// Paid amounts in minor units, keyed by currency code
    pub revenue: BTreeMap<String, i64>,
}

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    /// Reserve a seat and insert the registration atomically
    async fn create(&self, new: &NewRegistration) -> Result<ReserveOutcome>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Registration>>;

    async fn get_detail(&self, id: i64) -> Result<Option<RegistrationDetail>>;

    async fn list(&self, filter: &RegistrationFilter) -> Result<Vec<RegistrationDetail>>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<RegistrationDetail>>;

    async fn find_by_checkout_session(&self, checkout_session_id: &str)
        -> Result<Option<Registration>>;

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Registration>>;

    async fn set_checkout_session(&self, id: i64, checkout_session_id: &str) -> Result<()>;

    /// Confirm a paid registration. Returns false when it was already paid
    /// or is cancelled.
    async fn mark_paid(&self, id: i64, payment_intent_id: Option<&str>) -> Result<bool>;

    /// Change status of a registration that still holds its seat, without
    /// cancelling it. Returns false when nothing changed.
    async fn set_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool>;

    /// Cancel and release the seat. `payment_status` replaces the payment
    /// status when given. Returns false when it was already cancelled.
    async fn cancel(&self, id: i64, payment_status: Option<PaymentStatus>) -> Result<bool>;

    /// Like [`cancel`](Self::cancel), but leaves paid registrations alone.
    /// The paid check happens in the same statement as the cancellation.
    async fn cancel_unpaid(&self, id: i64, payment_status: PaymentStatus) -> Result<bool>;

    /// Delete, releasing the seat if the registration still held one
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn stats(&self) -> Result<RegistrationStats>;
}

pub struct SqlxRegistrationRepository {
    pool: DynDatabasePool,
}

impl SqlxRegistrationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RegistrationRepository> {
        Arc::new(Self::new(pool))
    }
}

const REGISTRATION_COLUMNS: &str = "r.id, r.session_id, r.user_id, r.first_name, r.last_name, \
    r.email, r.phone, r.company, r.payment_method, r.payment_status, r.status, r.currency, \
    r.amount, r.checkout_session_id, r.payment_intent_id, r.created_at, r.updated_at";

const DETAIL_JOIN: &str = "f.title AS formation_title, s.start_date AS session_start_date, \
    s.end_date AS session_end_date, s.location AS session_location \
    FROM registrations r \
    JOIN training_sessions s ON s.id = r.session_id \
    JOIN formations f ON f.id = s.formation_id";

const INSERT_REGISTRATION_SQL: &str = r#"
    INSERT INTO registrations
        (session_id, user_id, first_name, last_name, email, phone, company, payment_method,
         payment_status, status, currency, amount, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'pending', ?, ?, ?, ?)
"#;

const TAKE_SEAT_SQL: &str = r#"
    UPDATE training_sessions
    SET current_participants = current_participants + 1
    WHERE id = ? AND is_open = 1 AND current_participants < max_participants
"#;

const RELEASE_SEAT_SQL: &str = r#"
    UPDATE training_sessions
    SET current_participants = current_participants - 1
    WHERE id = ? AND current_participants > 0
"#;

const CANCEL_SQL: &str = r#"
    UPDATE registrations
    SET status = 'cancelled', payment_status = COALESCE(?, payment_status), updated_at = ?
    WHERE id = ? AND status <> 'cancelled'
"#;

const CANCEL_UNPAID_SQL: &str = r#"
    UPDATE registrations
    SET status = 'cancelled', payment_status = COALESCE(?, payment_status), updated_at = ?
    WHERE id = ? AND status <> 'cancelled' AND payment_status <> 'paid'
"#;

fn detail_query(filter_clause: &str) -> String {
    format!(
        "SELECT {}, {} {} ORDER BY r.created_at DESC, r.id DESC",
        REGISTRATION_COLUMNS, DETAIL_JOIN, filter_clause
    )
}

fn parse_column<T>(value: String, what: &str) -> Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    T::from_str(&value).with_context(|| format!("Invalid {} in database: {}", what, value))
}

#[async_trait]
impl RegistrationRepository for SqlxRegistrationRepository {
    async fn create(&self, new: &NewRegistration) -> Result<ReserveOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => reserve_sqlite(self.pool.sqlite()?, new).await,
            DatabaseDriver::Mysql => reserve_mysql(self.pool.mysql()?, new).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Registration>> {
        let sql = format!("SELECT {} FROM registrations r WHERE r.id = ?", REGISTRATION_COLUMNS);
        self.fetch_one_registration(&sql, SqlArg::Int(id)).await
    }

    async fn get_detail(&self, id: i64) -> Result<Option<RegistrationDetail>> {
        let sql = detail_query("WHERE r.id = ?");
        let details = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to get registration")?
                .iter()
                .map(row_to_detail_sqlite)
                .collect::<Result<Vec<_>>>()?,
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to get registration")?
                .iter()
                .map(row_to_detail_mysql)
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(details.into_iter().next())
    }

    async fn list(&self, filter: &RegistrationFilter) -> Result<Vec<RegistrationDetail>> {
        let sql = detail_query(
            "WHERE (? IS NULL OR r.session_id = ?) \
             AND (? IS NULL OR r.status = ?) \
             AND (? IS NULL OR r.payment_status = ?)",
        );
        let status = filter.status.map(|s| s.to_string());
        let payment_status = filter.payment_status.map(|s| s.to_string());
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(filter.session_id)
                .bind(filter.session_id)
                .bind(&status)
                .bind(&status)
                .bind(&payment_status)
                .bind(&payment_status)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list registrations")?
                .iter()
                .map(row_to_detail_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(filter.session_id)
                .bind(filter.session_id)
                .bind(&status)
                .bind(&status)
                .bind(&payment_status)
                .bind(&payment_status)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list registrations")?
                .iter()
                .map(row_to_detail_mysql)
                .collect(),
        }
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<RegistrationDetail>> {
        let sql = detail_query("WHERE r.user_id = ?");
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list user registrations")?
                .iter()
                .map(row_to_detail_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list user registrations")?
                .iter()
                .map(row_to_detail_mysql)
                .collect(),
        }
    }

    async fn find_by_checkout_session(
        &self,
        checkout_session_id: &str,
    ) -> Result<Option<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations r WHERE r.checkout_session_id = ?",
            REGISTRATION_COLUMNS
        );
        self.fetch_one_registration(&sql, SqlArg::Text(checkout_session_id))
            .await
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Registration>> {
        let sql = format!(
            "SELECT {} FROM registrations r WHERE r.payment_intent_id = ?",
            REGISTRATION_COLUMNS
        );
        self.fetch_one_registration(&sql, SqlArg::Text(payment_intent_id))
            .await
    }

    async fn set_checkout_session(&self, id: i64, checkout_session_id: &str) -> Result<()> {
        let sql = "UPDATE registrations SET checkout_session_id = ?, updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(checkout_session_id)
                .bind(now)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(checkout_session_id)
                .bind(now)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to store checkout session")?;
        Ok(())
    }

    async fn mark_paid(&self, id: i64, payment_intent_id: Option<&str>) -> Result<bool> {
        let sql = r#"
            UPDATE registrations
            SET payment_status = 'paid', status = 'confirmed',
                payment_intent_id = COALESCE(?, payment_intent_id), updated_at = ?
            WHERE id = ? AND payment_status <> 'paid' AND status <> 'cancelled'
        "#;
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(payment_intent_id)
                .bind(now)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(payment_intent_id)
                .bind(now)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to mark registration paid")?;
        Ok(affected > 0)
    }

    async fn set_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool> {
        let sql = r#"
            UPDATE registrations
            SET status = ?, payment_status = ?, updated_at = ?
            WHERE id = ? AND status <> 'cancelled' AND (status <> ? OR payment_status <> ?)
        "#;
        let status = status.to_string();
        let payment_status = payment_status.to_string();
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&status)
                .bind(&payment_status)
                .bind(now)
                .bind(id)
                .bind(&status)
                .bind(&payment_status)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&status)
                .bind(&payment_status)
                .bind(now)
                .bind(id)
                .bind(&status)
                .bind(&payment_status)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to update registration status")?;
        Ok(affected > 0)
    }

    async fn cancel(&self, id: i64, payment_status: Option<PaymentStatus>) -> Result<bool> {
        let payment_status = payment_status.map(|s| s.to_string());
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                cancel_sqlite(self.pool.sqlite()?, CANCEL_SQL, id, payment_status.as_deref()).await
            }
            DatabaseDriver::Mysql => {
                cancel_mysql(self.pool.mysql()?, CANCEL_SQL, id, payment_status.as_deref()).await
            }
        }
    }

    async fn cancel_unpaid(&self, id: i64, payment_status: PaymentStatus) -> Result<bool> {
        let payment_status = payment_status.to_string();
        let payment_status = Some(payment_status.as_str());
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                cancel_sqlite(self.pool.sqlite()?, CANCEL_UNPAID_SQL, id, payment_status).await
            }
            DatabaseDriver::Mysql => {
                cancel_mysql(self.pool.mysql()?, CANCEL_UNPAID_SQL, id, payment_status).await
            }
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn stats(&self) -> Result<RegistrationStats> {
        let counts_sql = "SELECT status, COUNT(*) AS n FROM registrations GROUP BY status";
        let paid_sql = "SELECT currency, amount FROM registrations WHERE payment_status = 'paid'";

        let (counts, paid): (Vec<(String, i64)>, Vec<(String, i64)>) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let counts = sqlx::query(counts_sql)
                    .fetch_all(pool)
                    .await
                    .context("Failed to count registrations")?
                    .iter()
                    .map(|row| (row.get("status"), row.get("n")))
                    .collect();
                let paid = sqlx::query(paid_sql)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load paid registrations")?
                    .iter()
                    .map(|row| (row.get("currency"), row.get("amount")))
                    .collect();
                (counts, paid)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let counts = sqlx::query(counts_sql)
                    .fetch_all(pool)
                    .await
                    .context("Failed to count registrations")?
                    .iter()
                    .map(|row| (row.get("status"), row.get("n")))
                    .collect();
                let paid = sqlx::query(paid_sql)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load paid registrations")?
                    .iter()
                    .map(|row| (row.get("currency"), row.get("amount")))
                    .collect();
                (counts, paid)
            }
        };

        let mut stats = RegistrationStats::default();
        for (status, n) in counts {
            match parse_column::<RegistrationStatus>(status, "status")? {
                RegistrationStatus::Pending => stats.pending += n,
                RegistrationStatus::Confirmed => stats.confirmed += n,
                RegistrationStatus::Cancelled => stats.cancelled += n,
            }
        }
        for (currency, amount) in paid {
            *stats.revenue.entry(currency).or_insert(0) += amount;
        }
        Ok(stats)
    }
}

enum SqlArg<'a> {
    Int(i64),
    Text(&'a str),
}

impl SqlxRegistrationRepository {
    async fn fetch_one_registration(
        &self,
        sql: &str,
        arg: SqlArg<'_>,
    ) -> Result<Option<Registration>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let query = sqlx::query(sql);
                let query = match arg {
                    SqlArg::Int(v) => query.bind(v),
                    SqlArg::Text(v) => query.bind(v),
                };
                query
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to fetch registration")?
                    .as_ref()
                    .map(row_to_registration_sqlite)
                    .transpose()
            }
            DatabaseDriver::Mysql => {
                let query = sqlx::query(sql);
                let query = match arg {
                    SqlArg::Int(v) => query.bind(v),
                    SqlArg::Text(v) => query.bind(v),
                };
                query
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to fetch registration")?
                    .as_ref()
                    .map(row_to_registration_mysql)
                    .transpose()
            }
        }
    }
}

fn created_registration(id: i64, new: &NewRegistration, now: chrono::DateTime<Utc>) -> Registration {
    Registration {
        id,
        session_id: new.session_id,
        user_id: new.user_id,
        first_name: new.first_name.clone(),
        last_name: new.last_name.clone(),
        email: new.email.clone(),
        phone: new.phone.clone(),
        company: new.company.clone(),
        payment_method: new.payment_method,
        payment_status: PaymentStatus::Pending,
        status: RegistrationStatus::Pending,
        currency: new.currency,
        amount: new.amount,
        checkout_session_id: None,
        payment_intent_id: None,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn reserve_sqlite(pool: &SqlitePool, new: &NewRegistration) -> Result<ReserveOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let session = sqlx::query("SELECT is_open FROM training_sessions WHERE id = ?")
        .bind(new.session_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load session")?;
    let Some(session) = session else {
        return Ok(ReserveOutcome::SessionNotFound);
    };
    let is_open: bool = session.get("is_open");
    if !is_open {
        return Ok(ReserveOutcome::SessionClosed);
    }

    let taken = sqlx::query(TAKE_SEAT_SQL)
        .bind(new.session_id)
        .execute(&mut *tx)
        .await
        .context("Failed to reserve seat")?
        .rows_affected();
    if taken == 0 {
        return Ok(ReserveOutcome::SessionFull);
    }

    let now = Utc::now();
    let result = sqlx::query(INSERT_REGISTRATION_SQL)
        .bind(new.session_id)
        .bind(new.user_id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.company)
        .bind(new.payment_method.to_string())
        .bind(new.currency.to_string())
        .bind(new.amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create registration")?;

    tx.commit().await.context("Failed to commit registration")?;
    Ok(ReserveOutcome::Created(created_registration(
        result.last_insert_rowid(),
        new,
        now,
    )))
}

async fn cancel_sqlite(
    pool: &SqlitePool,
    cancel_sql: &str,
    id: i64,
    payment_status: Option<&str>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let session_id: Option<i64> =
        sqlx::query_scalar("SELECT session_id FROM registrations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load registration")?;
    let Some(session_id) = session_id else {
        return Ok(false);
    };

    let changed = sqlx::query(cancel_sql)
        .bind(payment_status)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to cancel registration")?
        .rows_affected();
    if changed == 0 {
        return Ok(false);
    }

    sqlx::query(RELEASE_SEAT_SQL)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .context("Failed to release seat")?;

    tx.commit().await.context("Failed to commit cancellation")?;
    Ok(true)
}

async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT session_id, status FROM registrations WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load registration")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let session_id: i64 = row.get("session_id");
    let status: RegistrationStatus = parse_column(row.get("status"), "status")?;

    sqlx::query("DELETE FROM registrations WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete registration")?;

    if status != RegistrationStatus::Cancelled {
        sqlx::query(RELEASE_SEAT_SQL)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .context("Failed to release seat")?;
    }

    tx.commit().await.context("Failed to commit deletion")?;
    Ok(true)
}

fn row_to_registration_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Registration> {
    Ok(Registration {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company: row.get("company"),
        payment_method: parse_column::<PaymentMethod>(row.get("payment_method"), "payment method")?,
        payment_status: parse_column::<PaymentStatus>(row.get("payment_status"), "payment status")?,
        status: parse_column::<RegistrationStatus>(row.get("status"), "status")?,
        currency: parse_column::<Currency>(row.get("currency"), "currency")?,
        amount: row.get("amount"),
        checkout_session_id: row.get("checkout_session_id"),
        payment_intent_id: row.get("payment_intent_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_detail_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<RegistrationDetail> {
    Ok(RegistrationDetail {
        registration: row_to_registration_sqlite(row)?,
        formation_title: row.get("formation_title"),
        session_start_date: row.get("session_start_date"),
        session_end_date: row.get("session_end_date"),
        session_location: row.get("session_location"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn reserve_mysql(pool: &MySqlPool, new: &NewRegistration) -> Result<ReserveOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let session = sqlx::query("SELECT is_open FROM training_sessions WHERE id = ? FOR UPDATE")
        .bind(new.session_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load session")?;
    let Some(session) = session else {
        return Ok(ReserveOutcome::SessionNotFound);
    };
    let is_open: bool = session.get("is_open");
    if !is_open {
        return Ok(ReserveOutcome::SessionClosed);
    }

    let taken = sqlx::query(TAKE_SEAT_SQL)
        .bind(new.session_id)
        .execute(&mut *tx)
        .await
        .context("Failed to reserve seat")?
        .rows_affected();
    if taken == 0 {
        return Ok(ReserveOutcome::SessionFull);
    }

    let now = Utc::now();
    let result = sqlx::query(INSERT_REGISTRATION_SQL)
        .bind(new.session_id)
        .bind(new.user_id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.company)
        .bind(new.payment_method.to_string())
        .bind(new.currency.to_string())
        .bind(new.amount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create registration")?;

    tx.commit().await.context("Failed to commit registration")?;
    Ok(ReserveOutcome::Created(created_registration(
        result.last_insert_id() as i64,
        new,
        now,
    )))
}

async fn cancel_mysql(
    pool: &MySqlPool,
    cancel_sql: &str,
    id: i64,
    payment_status: Option<&str>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let session_id: Option<i64> =
        sqlx::query_scalar("SELECT session_id FROM registrations WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load registration")?;
    let Some(session_id) = session_id else {
        return Ok(false);
    };

    let changed = sqlx::query(cancel_sql)
        .bind(payment_status)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to cancel registration")?
        .rows_affected();
    if changed == 0 {
        return Ok(false);
    }

    sqlx::query(RELEASE_SEAT_SQL)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .context("Failed to release seat")?;

    tx.commit().await.context("Failed to commit cancellation")?;
    Ok(true)
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT session_id, status FROM registrations WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load registration")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let session_id: i64 = row.get("session_id");
    let status: RegistrationStatus = parse_column(row.get("status"), "status")?;

    sqlx::query("DELETE FROM registrations WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete registration")?;

    if status != RegistrationStatus::Cancelled {
        sqlx::query(RELEASE_SEAT_SQL)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .context("Failed to release seat")?;
    }

    tx.commit().await.context("Failed to commit deletion")?;
    Ok(true)
}

fn row_to_registration_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Registration> {
    Ok(Registration {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company: row.get("company"),
        payment_method: parse_column::<PaymentMethod>(row.get("payment_method"), "payment method")?,
        payment_status: parse_column::<PaymentStatus>(row.get("payment_status"), "payment status")?,
        status: parse_column::<RegistrationStatus>(row.get("status"), "status")?,
        currency: parse_column::<Currency>(row.get("currency"), "currency")?,
        amount: row.get("amount"),
        checkout_session_id: row.get("checkout_session_id"),
        payment_intent_id: row.get("payment_intent_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_detail_mysql(row: &sqlx::mysql::MySqlRow) -> Result<RegistrationDetail> {
    Ok(RegistrationDetail {
        registration: row_to_registration_mysql(row)?,
        formation_title: row.get("formation_title"),
        session_start_date: row.get("session_start_date"),
        session_end_date: row.get("session_end_date"),
        session_location: row.get("session_location"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        FormationRepository, SqlxFormationRepository, SqlxTrainingSessionRepository,
        TrainingSessionRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Formation, TrainingSession};
    use chrono::NaiveDate;

    struct Fixture {
        repo: SqlxRegistrationRepository,
        sessions: SqlxTrainingSessionRepository,
        session_id: i64,
    }

    async fn setup(max_participants: i32) -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool).await.expect("Failed to run migrations");
        let now = Utc::now();
        let formation = SqlxFormationRepository::new(pool.clone())
            .create(&Formation {
                id: 0,
                slug: "rust".to_string(),
                title: "Rust avancé".to_string(),
                description: String::new(),
                duration: "2 jours".to_string(),
                category: "dev".to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2030, 3, 1).unwrap();
        let sessions = SqlxTrainingSessionRepository::new(pool.clone());
        let session = sessions
            .create(&TrainingSession {
                id: 0,
                formation_id: formation.id,
                start_date: start,
                end_date: start,
                location: "Lausanne".to_string(),
                max_participants,
                current_participants: 0,
                price_eur: 50_000,
                price_chf: 48_000,
                is_open: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        Fixture {
            repo: SqlxRegistrationRepository::new(pool),
            sessions,
            session_id: session.id,
        }
    }

    fn new_registration(session_id: i64, email: &str) -> NewRegistration {
        NewRegistration {
            session_id,
            user_id: None,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            phone: None,
            company: Some("Analytical".to_string()),
            payment_method: PaymentMethod::Card,
            currency: Currency::Chf,
            amount: 51_888,
        }
    }

    async fn create(fx: &Fixture, email: &str) -> ReserveOutcome {
        fx.repo.create(&new_registration(fx.session_id, email)).await.unwrap()
    }

    async fn participants(fx: &Fixture) -> i32 {
        fx.sessions
            .get_by_id(fx.session_id)
            .await
            .unwrap()
            .unwrap()
            .current_participants
    }

    fn created(outcome: ReserveOutcome) -> Registration {
        match outcome {
            ReserveOutcome::Created(registration) => registration,
            other => panic!("expected a registration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_takes_a_seat() {
        let fx = setup(2).await;
        let registration = created(create(&fx, "a@example.com").await);

        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert_eq!(participants(&fx).await, 1);

        let detail = fx.repo.get_detail(registration.id).await.unwrap().unwrap();
        assert_eq!(detail.formation_title, "Rust avancé");
        assert_eq!(detail.registration.company.as_deref(), Some("Analytical"));
    }

    #[tokio::test]
    async fn test_create_refuses_full_session() {
        let fx = setup(1).await;
        created(create(&fx, "a@example.com").await);

        assert!(matches!(create(&fx, "b@example.com").await, ReserveOutcome::SessionFull));
        assert_eq!(participants(&fx).await, 1);
        assert_eq!(fx.repo.list(&RegistrationFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_refuses_closed_or_missing_session() {
        let fx = setup(5).await;
        let mut session = fx.sessions.get_by_id(fx.session_id).await.unwrap().unwrap();
        session.is_open = false;
        assert!(fx.sessions.update(&session).await.unwrap());

        assert!(matches!(create(&fx, "a@example.com").await, ReserveOutcome::SessionClosed));
        let outcome = fx.repo.create(&new_registration(999, "a@example.com")).await.unwrap();
        assert!(matches!(outcome, ReserveOutcome::SessionNotFound));
    }

    #[tokio::test]
    async fn test_cancel_releases_seat_once() {
        let fx = setup(2).await;
        let registration = created(create(&fx, "a@example.com").await);

        assert!(fx.repo.cancel(registration.id, Some(PaymentStatus::Expired)).await.unwrap());
        assert!(!fx.repo.cancel(registration.id, Some(PaymentStatus::Expired)).await.unwrap());
        assert_eq!(participants(&fx).await, 0);

        let found = fx.repo.get_by_id(registration.id).await.unwrap().unwrap();
        assert_eq!(found.status, RegistrationStatus::Cancelled);
        assert_eq!(found.payment_status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_unpaid_leaves_paid_registrations() {
        let fx = setup(2).await;
        let paid = created(create(&fx, "a@example.com").await);
        let pending = created(create(&fx, "b@example.com").await);
        assert!(fx.repo.mark_paid(paid.id, Some("pi_1")).await.unwrap());

        assert!(!fx.repo.cancel_unpaid(paid.id, PaymentStatus::Expired).await.unwrap());
        let found = fx.repo.get_by_id(paid.id).await.unwrap().unwrap();
        assert_eq!(found.status, RegistrationStatus::Confirmed);
        assert_eq!(found.payment_status, PaymentStatus::Paid);

        assert!(fx.repo.cancel_unpaid(pending.id, PaymentStatus::Expired).await.unwrap());
        assert!(!fx.repo.cancel_unpaid(pending.id, PaymentStatus::Expired).await.unwrap());
        assert_eq!(participants(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let fx = setup(2).await;
        let registration = created(create(&fx, "a@example.com").await);
        fx.repo.set_checkout_session(registration.id, "cs_test_1").await.unwrap();

        assert!(fx.repo.mark_paid(registration.id, Some("pi_1")).await.unwrap());
        assert!(!fx.repo.mark_paid(registration.id, Some("pi_1")).await.unwrap());

        let found = fx.repo.find_by_checkout_session("cs_test_1").await.unwrap().unwrap();
        assert_eq!(found.payment_status, PaymentStatus::Paid);
        assert_eq!(found.status, RegistrationStatus::Confirmed);
        assert!(fx.repo.find_by_payment_intent("pi_1").await.unwrap().is_some());
        assert_eq!(participants(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_delete_releases_held_seat_only() {
        let fx = setup(3).await;
        let held = created(create(&fx, "a@example.com").await);
        let cancelled = created(create(&fx, "b@example.com").await);
        fx.repo.cancel(cancelled.id, None).await.unwrap();
        assert_eq!(participants(&fx).await, 1);

        assert!(fx.repo.delete(cancelled.id).await.unwrap());
        assert_eq!(participants(&fx).await, 1);
        assert!(fx.repo.delete(held.id).await.unwrap());
        assert_eq!(participants(&fx).await, 0);
        assert!(!fx.repo.delete(held.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_and_filters() {
        let fx = setup(5).await;
        let paid = created(create(&fx, "a@example.com").await);
        let pending = created(create(&fx, "b@example.com").await);
        let gone = created(create(&fx, "c@example.com").await);
        fx.repo.mark_paid(paid.id, None).await.unwrap();
        fx.repo.cancel(gone.id, Some(PaymentStatus::Cancelled)).await.unwrap();

        let stats = fx.repo.stats().await.unwrap();
        assert_eq!((stats.pending, stats.confirmed, stats.cancelled), (1, 1, 1));
        assert_eq!(stats.revenue.get("chf"), Some(&51_888));

        let filter = RegistrationFilter {
            status: Some(RegistrationStatus::Pending),
            ..Default::default()
        };
        let listed = fx.repo.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].registration.id, pending.id);
    }

    #[tokio::test]
    async fn test_set_status_skips_cancelled() {
        let fx = setup(2).await;
        let registration = created(create(&fx, "a@example.com").await);

        assert!(fx
            .repo
            .set_status(registration.id, RegistrationStatus::Confirmed, PaymentStatus::Pending)
            .await
            .unwrap());
        fx.repo.cancel(registration.id, None).await.unwrap();
        assert!(!fx
            .repo
            .set_status(registration.id, RegistrationStatus::Confirmed, PaymentStatus::Paid)
            .await
            .unwrap());
    }
}
