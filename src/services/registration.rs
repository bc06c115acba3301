//! Registration service
//!
//! Seat reservation, participant and admin notifications, admin status
//! changes and cancellation. Seat counters move inside the repository
//! transactions; this layer validates, prices and notifies.

use crate::db::repositories::{RegistrationRepository, RegistrationStats, ReserveOutcome};
use crate::models::{
    CreateRegistrationInput, NewRegistration, PaymentStatus, RegistrationDetail,
    RegistrationFilter, RegistrationStatus, UpdateRegistrationInput, User,
};
use crate::services::catalog::CatalogService;
use crate::services::checkout::compute_price;
use crate::services::email::EmailService;
use crate::services::user::is_valid_email;
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct RegistrationService {
    repo: Arc<dyn RegistrationRepository>,
    catalog: Arc<CatalogService>,
    email: Arc<EmailService>,
    vat_rate: f64,
}

impl RegistrationService {
    pub fn new(
        repo: Arc<dyn RegistrationRepository>,
        catalog: Arc<CatalogService>,
        email: Arc<EmailService>,
        vat_rate: f64,
    ) -> Self {
        Self {
            repo,
            catalog,
            email,
            vat_rate,
        }
    }

    /// Reserve a seat for `user`.
    ///
    /// The amount is the session price in the chosen currency plus VAT. Both
    /// payment methods start pending: card until the payment webhook,
    /// invoice until an admin confirms.
    pub async fn create(
        &self,
        user: &User,
        input: CreateRegistrationInput,
    ) -> Result<RegistrationDetail, RegistrationServiceError> {
        let first_name = input.first_name.trim().to_string();
        let last_name = input.last_name.trim().to_string();
        let email = input.email.trim().to_lowercase();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(RegistrationServiceError::Validation(
                "First and last name are required".to_string(),
            ));
        }
        if !is_valid_email(&email) {
            return Err(RegistrationServiceError::Validation(
                "Invalid email format".to_string(),
            ));
        }

        let session = self
            .catalog
            .get_session(input.session_id)
            .await
            .map_err(|_| session_not_found(input.session_id))?;
        let amount = compute_price(session.price_for(input.currency), self.vat_rate)
            .ok_or_else(|| {
                RegistrationServiceError::Validation("Session price is out of range".to_string())
            })?;

        let outcome = self
            .repo
            .create(&NewRegistration {
                session_id: session.id,
                user_id: Some(user.id),
                first_name,
                last_name,
                email,
                phone: non_empty(input.phone),
                company: non_empty(input.company),
                payment_method: input.payment_method,
                currency: input.currency,
                amount,
            })
            .await
            .context("Failed to create registration")?;

        let registration = match outcome {
            ReserveOutcome::Created(registration) => registration,
            ReserveOutcome::SessionNotFound => return Err(session_not_found(session.id)),
            ReserveOutcome::SessionClosed => {
                return Err(RegistrationServiceError::Conflict(
                    "Session is closed for registration".to_string(),
                ))
            }
            ReserveOutcome::SessionFull => {
                return Err(RegistrationServiceError::Conflict("Session is full".to_string()))
            }
        };

        tracing::info!(
            registration_id = registration.id,
            session_id = registration.session_id,
            method = %registration.payment_method,
            amount = registration.amount,
            "Registration created"
        );
        self.catalog.invalidate().await;

        let detail = self.get(registration.id).await?;
        if let Err(e) = self.email.registration_received(&detail).await {
            tracing::error!(registration_id = registration.id, "Failed to send receipt: {:#}", e);
        }
        if let Err(e) = self.email.registration_admin_notice(&detail).await {
            tracing::error!(
                registration_id = registration.id,
                "Failed to send admin notice: {:#}",
                e
            );
        }
        Ok(detail)
    }

    pub async fn list_mine(
        &self,
        user: &User,
    ) -> Result<Vec<RegistrationDetail>, RegistrationServiceError> {
        Ok(self
            .repo
            .list_by_user(user.id)
            .await
            .context("Failed to list registrations")?)
    }

    pub async fn list(
        &self,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationDetail>, RegistrationServiceError> {
        Ok(self
            .repo
            .list(filter)
            .await
            .context("Failed to list registrations")?)
    }

    pub async fn get(&self, id: i64) -> Result<RegistrationDetail, RegistrationServiceError> {
        self.repo
            .get_detail(id)
            .await
            .context("Failed to get registration")?
            .ok_or_else(|| registration_not_found(id))
    }

    /// Admin status change.
    ///
    /// `status = cancelled` releases the seat. Setting `payment_status = paid`
    /// confirms the registration and notifies the participant. A cancelled
    /// registration cannot be reopened.
    pub async fn update(
        &self,
        id: i64,
        input: UpdateRegistrationInput,
    ) -> Result<RegistrationDetail, RegistrationServiceError> {
        let current = self.get(id).await?.registration;

        if input.status == Some(RegistrationStatus::Cancelled) {
            if current.status != RegistrationStatus::Cancelled {
                let payment_status = input
                    .payment_status
                    .or(default_cancel_payment(current.payment_status));
                self.release(id, payment_status).await?;
            }
            return self.get(id).await;
        }

        if current.status == RegistrationStatus::Cancelled {
            if input.status.is_some() || input.payment_status.is_some() {
                return Err(RegistrationServiceError::Validation(
                    "A cancelled registration cannot be reopened".to_string(),
                ));
            }
            return self.get(id).await;
        }

        if input.payment_status == Some(PaymentStatus::Paid)
            && current.payment_status != PaymentStatus::Paid
        {
            self.repo
                .mark_paid(id, None)
                .await
                .context("Failed to mark registration paid")?;
            tracing::info!(registration_id = id, "Registration marked paid by admin");
            let detail = self.get(id).await?;
            if let Err(e) = self.email.payment_confirmed(&detail).await {
                tracing::error!(registration_id = id, "Failed to send confirmation: {:#}", e);
            }
        }

        let current = self.get(id).await?.registration;
        let status = input.status.unwrap_or(current.status);
        let payment_status = input.payment_status.unwrap_or(current.payment_status);
        if status != current.status || payment_status != current.payment_status {
            self.repo
                .set_status(id, status, payment_status)
                .await
                .context("Failed to update registration status")?;
            tracing::info!(
                registration_id = id,
                status = %status,
                payment_status = %payment_status,
                "Registration status changed"
            );
        }

        self.get(id).await
    }

    /// Cancel on behalf of the owner or an admin. Cancelling twice is a no-op.
    pub async fn cancel(
        &self,
        user: &User,
        id: i64,
    ) -> Result<RegistrationDetail, RegistrationServiceError> {
        let current = self.get(id).await?.registration;
        if !user.can_access(current.user_id) {
            return Err(RegistrationServiceError::Forbidden(
                "Registration belongs to another account".to_string(),
            ));
        }

        if current.status != RegistrationStatus::Cancelled {
            self.release(id, default_cancel_payment(current.payment_status))
                .await?;
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), RegistrationServiceError> {
        if !self
            .repo
            .delete(id)
            .await
            .context("Failed to delete registration")?
        {
            return Err(registration_not_found(id));
        }
        tracing::info!(registration_id = id, "Registration deleted");
        self.catalog.invalidate().await;
        Ok(())
    }

    pub async fn stats(&self) -> Result<RegistrationStats, RegistrationServiceError> {
        Ok(self
            .repo
            .stats()
            .await
            .context("Failed to compute registration stats")?)
    }

    async fn release(
        &self,
        id: i64,
        payment_status: Option<PaymentStatus>,
    ) -> Result<(), RegistrationServiceError> {
        if self
            .repo
            .cancel(id, payment_status)
            .await
            .context("Failed to cancel registration")?
        {
            tracing::info!(registration_id = id, "Registration cancelled, seat released");
            self.catalog.invalidate().await;
        }
        Ok(())
    }
}

/// Unpaid registrations have their payment cancelled too; a paid one keeps
/// `paid` so the refund stays visible.
fn default_cancel_payment(current: PaymentStatus) -> Option<PaymentStatus> {
    match current {
        PaymentStatus::Pending => Some(PaymentStatus::Cancelled),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn session_not_found(id: i64) -> RegistrationServiceError {
    RegistrationServiceError::NotFound(format!("Session {} not found", id))
}

fn registration_not_found(id: i64) -> RegistrationServiceError {
    RegistrationServiceError::NotFound(format!("Registration {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{
        SqlxFormationRepository, SqlxRegistrationRepository, SqlxTrainingSessionRepository,
        SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{
        CreateFormationInput, CreateSessionInput, Currency, PaymentMethod, UserRole,
    };
    use chrono::{Duration, Utc};

    struct Fixture {
        service: RegistrationService,
        catalog: Arc<CatalogService>,
        email: Arc<EmailService>,
        session_id: i64,
        member: User,
        other: User,
        admin: User,
    }

    async fn setup(max_participants: i32) -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let admin = create_user(&users, "a@example.com", UserRole::Admin).await;
        let member = create_user(&users, "m@example.com", UserRole::Member).await;
        let other = create_user(&users, "o@example.com", UserRole::Member).await;

        let catalog = Arc::new(CatalogService::new(
            SqlxFormationRepository::boxed(pool.clone()),
            SqlxTrainingSessionRepository::boxed(pool.clone()),
            create_cache(&CacheConfig::default()),
        ));
        let formation = catalog
            .create_formation(CreateFormationInput {
                slug: None,
                title: "Rust avancé".to_string(),
                description: String::new(),
                duration: "2 days".to_string(),
                category: "dev".to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        let start = Utc::now().date_naive() + Duration::days(30);
        let session = catalog
            .create_session(CreateSessionInput {
                formation_id: formation.id,
                start_date: start,
                end_date: start + Duration::days(1),
                location: "Lausanne".to_string(),
                max_participants,
                price_eur: 50_000,
                price_chf: 48_000,
                is_open: true,
            })
            .await
            .unwrap();

        let email = Arc::new(EmailService::log_only());
        let service = RegistrationService::new(
            SqlxRegistrationRepository::boxed(pool),
            catalog.clone(),
            email.clone(),
            8.1,
        );
        Fixture {
            service,
            catalog,
            email,
            session_id: session.id,
            member,
            other,
            admin,
        }
    }

    async fn create_user(users: &SqlxUserRepository, email: &str, role: UserRole) -> User {
        users
            .create(&User::new(email.into(), "U".into(), String::new(), role))
            .await
            .unwrap()
    }

    fn input(session_id: i64, method: PaymentMethod) -> CreateRegistrationInput {
        CreateRegistrationInput {
            session_id,
            first_name: " Ada ".to_string(),
            last_name: "Lovelace".to_string(),
            email: "Ada@Example.com".to_string(),
            phone: Some("  ".to_string()),
            company: Some("Analytical".to_string()),
            payment_method: method,
            currency: Currency::Chf,
        }
    }

    #[tokio::test]
    async fn test_create_prices_and_notifies() {
        let f = setup(5).await;
        let detail = f
            .service
            .create(&f.member, input(f.session_id, PaymentMethod::Invoice))
            .await
            .unwrap();

        let r = &detail.registration;
        assert_eq!(r.amount, 51_888);
        assert_eq!(r.first_name, "Ada");
        assert_eq!(r.email, "ada@example.com");
        assert!(r.phone.is_none());
        assert_eq!(r.user_id, Some(f.member.id));
        assert_eq!(r.status, RegistrationStatus::Pending);
        assert_eq!(r.payment_status, PaymentStatus::Pending);
        assert_eq!(detail.formation_title, "Rust avancé");

        let outbox = f.email.outbox();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].to, "ada@example.com");

        let session = f.catalog.get_session(f.session_id).await.unwrap();
        assert_eq!(session.current_participants, 1);
    }

    #[tokio::test]
    async fn test_create_refuses_full_and_missing_sessions() {
        let f = setup(1).await;
        f.service
            .create(&f.member, input(f.session_id, PaymentMethod::Card))
            .await
            .unwrap();

        let full = f
            .service
            .create(&f.other, input(f.session_id, PaymentMethod::Card))
            .await;
        assert!(matches!(full, Err(RegistrationServiceError::Conflict(_))));

        let missing = f
            .service
            .create(&f.other, input(9999, PaymentMethod::Card))
            .await;
        assert!(matches!(missing, Err(RegistrationServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = setup(5).await;
        let mut bad_email = input(f.session_id, PaymentMethod::Card);
        bad_email.email = "nope".to_string();
        let mut no_name = input(f.session_id, PaymentMethod::Card);
        no_name.last_name = " ".to_string();

        for input in [bad_email, no_name] {
            let result = f.service.create(&f.member, input).await;
            assert!(matches!(result, Err(RegistrationServiceError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_cancel_by_owner_releases_seat_once() {
        let f = setup(5).await;
        let id = f
            .service
            .create(&f.member, input(f.session_id, PaymentMethod::Card))
            .await
            .unwrap()
            .registration
            .id;

        let stranger = f.service.cancel(&f.other, id).await;
        assert!(matches!(stranger, Err(RegistrationServiceError::Forbidden(_))));

        let cancelled = f.service.cancel(&f.member, id).await.unwrap();
        assert_eq!(cancelled.registration.status, RegistrationStatus::Cancelled);
        assert_eq!(cancelled.registration.payment_status, PaymentStatus::Cancelled);
        f.service.cancel(&f.admin, id).await.unwrap();

        let session = f.catalog.get_session(f.session_id).await.unwrap();
        assert_eq!(session.current_participants, 0);
    }

    #[tokio::test]
    async fn test_admin_confirms_invoice_payment() {
        let f = setup(5).await;
        let id = f
            .service
            .create(&f.member, input(f.session_id, PaymentMethod::Invoice))
            .await
            .unwrap()
            .registration
            .id;

        let updated = f
            .service
            .update(
                id,
                UpdateRegistrationInput {
                    status: None,
                    payment_status: Some(PaymentStatus::Paid),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.registration.payment_status, PaymentStatus::Paid);
        assert_eq!(updated.registration.status, RegistrationStatus::Confirmed);
        assert!(f
            .email
            .outbox()
            .iter()
            .any(|m| m.subject.starts_with("Payment confirmed")));
    }

    #[tokio::test]
    async fn test_admin_cancel_then_reopen_is_refused() {
        let f = setup(5).await;
        let id = f
            .service
            .create(&f.member, input(f.session_id, PaymentMethod::Invoice))
            .await
            .unwrap()
            .registration
            .id;

        let cancelled = f
            .service
            .update(
                id,
                UpdateRegistrationInput {
                    status: Some(RegistrationStatus::Cancelled),
                    payment_status: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.registration.status, RegistrationStatus::Cancelled);
        assert_eq!(f.catalog.get_session(f.session_id).await.unwrap().current_participants, 0);

        let reopen = f
            .service
            .update(
                id,
                UpdateRegistrationInput {
                    status: Some(RegistrationStatus::Confirmed),
                    payment_status: None,
                },
            )
            .await;
        assert!(matches!(reopen, Err(RegistrationServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_and_lists() {
        let f = setup(5).await;
        let mine = f
            .service
            .create(&f.member, input(f.session_id, PaymentMethod::Card))
            .await
            .unwrap();
        f.service
            .create(&f.other, input(f.session_id, PaymentMethod::Card))
            .await
            .unwrap();

        assert_eq!(f.service.list_mine(&f.member).await.unwrap().len(), 1);
        assert_eq!(f.service.list(&RegistrationFilter::default()).await.unwrap().len(), 2);

        f.service.delete(mine.registration.id).await.unwrap();
        assert!(matches!(
            f.service.delete(mine.registration.id).await,
            Err(RegistrationServiceError::NotFound(_))
        ));
        assert_eq!(f.catalog.get_session(f.session_id).await.unwrap().current_participants, 1);
        assert_eq!(f.service.stats().await.unwrap().pending, 1);
    }
}
