//! Training catalog service
//!
//! Formations and their sessions: public reads (cached) and admin CRUD.
//! Every write drops the whole `catalog:*` cache family.

use crate::cache::{keys, CacheLayer, SharedCache};
use crate::db::repositories::{FormationRepository, TrainingSessionRepository};
use crate::models::{
    CreateFormationInput, CreateSessionInput, Formation, FormationDetail, SessionWithFormation,
    TrainingSession, UpdateFormationInput, UpdateSessionInput,
};
use crate::services::slug::{generate_slug, is_valid_slug};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct CatalogService {
    formations: Arc<dyn FormationRepository>,
    sessions: Arc<dyn TrainingSessionRepository>,
    cache: SharedCache,
}

impl CatalogService {
    pub fn new(
        formations: Arc<dyn FormationRepository>,
        sessions: Arc<dyn TrainingSessionRepository>,
        cache: SharedCache,
    ) -> Self {
        Self {
            formations,
            sessions,
            cache,
        }
    }

    // ========================================================================
    // Public reads
    // ========================================================================

    /// Active formations, optionally restricted to one category
    pub async fn list_formations(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<Formation>, CatalogError> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        let key = keys::formations(category);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let formations = self
            .formations
            .list(true, category)
            .await
            .context("Failed to list formations")?;
        self.store(&key, &formations).await;
        Ok(formations)
    }

    /// Active formation with its upcoming open sessions
    pub async fn get_formation_by_slug(&self, slug: &str) -> Result<FormationDetail, CatalogError> {
        let key = keys::formation(slug);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let formation = self
            .formations
            .get_by_slug(slug)
            .await
            .context("Failed to get formation by slug")?
            .filter(|f| f.is_active)
            .ok_or_else(|| CatalogError::NotFound(format!("Formation '{}' not found", slug)))?;

        let sessions = self
            .sessions
            .list_upcoming(today(), Some(formation.id))
            .await
            .context("Failed to list upcoming sessions")?
            .into_iter()
            .map(|s| s.session)
            .collect();

        let detail = FormationDetail {
            formation,
            sessions,
        };
        self.store(&key, &detail).await;
        Ok(detail)
    }

    /// Open sessions starting today or later, soonest first
    pub async fn list_upcoming_sessions(
        &self,
        formation_id: Option<i64>,
    ) -> Result<Vec<SessionWithFormation>, CatalogError> {
        let key = keys::upcoming_sessions(formation_id);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let sessions = self
            .sessions
            .list_upcoming(today(), formation_id)
            .await
            .context("Failed to list upcoming sessions")?;
        self.store(&key, &sessions).await;
        Ok(sessions)
    }

    /// A session as shown publicly; sessions of inactive formations are hidden
    pub async fn get_public_session(&self, id: i64) -> Result<SessionWithFormation, CatalogError> {
        let session = self
            .sessions
            .get_with_formation(id)
            .await
            .context("Failed to get session")?
            .ok_or_else(|| session_not_found(id))?;

        let formation = self
            .formations
            .get_by_id(session.session.formation_id)
            .await
            .context("Failed to get formation")?;
        match formation {
            Some(f) if f.is_active => Ok(session),
            _ => Err(session_not_found(id)),
        }
    }

    // ========================================================================
    // Formations (admin)
    // ========================================================================

    pub async fn list_all_formations(&self) -> Result<Vec<Formation>, CatalogError> {
        Ok(self
            .formations
            .list(false, None)
            .await
            .context("Failed to list formations")?)
    }

    pub async fn get_formation(&self, id: i64) -> Result<Formation, CatalogError> {
        self.formations
            .get_by_id(id)
            .await
            .context("Failed to get formation")?
            .ok_or_else(|| formation_not_found(id))
    }

    pub async fn create_formation(
        &self,
        input: CreateFormationInput,
    ) -> Result<Formation, CatalogError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(CatalogError::Validation("Title cannot be empty".to_string()));
        }
        let slug = self
            .resolve_formation_slug(input.slug.as_deref(), &title, None)
            .await?;

        let now = Utc::now();
        let formation = self
            .formations
            .create(&Formation {
                id: 0,
                slug,
                title,
                description: input.description,
                duration: input.duration.trim().to_string(),
                category: input.category.trim().to_string(),
                is_active: input.is_active,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create formation")?;

        tracing::info!(formation_id = formation.id, slug = %formation.slug, "Formation created");
        self.invalidate().await;
        Ok(formation)
    }

    pub async fn update_formation(
        &self,
        id: i64,
        input: UpdateFormationInput,
    ) -> Result<Formation, CatalogError> {
        let mut formation = self.get_formation(id).await?;
        let slug_changed = input.slug.is_some();
        input.apply(&mut formation);

        formation.title = formation.title.trim().to_string();
        if formation.title.is_empty() {
            return Err(CatalogError::Validation("Title cannot be empty".to_string()));
        }
        if slug_changed {
            let requested = formation.slug.clone();
            formation.slug = self
                .resolve_formation_slug(Some(&requested), &formation.title, Some(id))
                .await?;
        }
        formation.updated_at = Utc::now();

        let updated = self
            .formations
            .update(&formation)
            .await
            .context("Failed to update formation")?;
        self.invalidate().await;
        Ok(updated)
    }

    /// Refused while the formation still has sessions
    pub async fn delete_formation(&self, id: i64) -> Result<(), CatalogError> {
        self.get_formation(id).await?;

        let sessions = self
            .formations
            .count_sessions(id)
            .await
            .context("Failed to count sessions")?;
        if sessions > 0 {
            return Err(CatalogError::Conflict(format!(
                "Formation {} still has {} session(s)",
                id, sessions
            )));
        }

        if !self
            .formations
            .delete(id)
            .await
            .context("Failed to delete formation")?
        {
            return Err(formation_not_found(id));
        }
        tracing::info!(formation_id = id, "Formation deleted");
        self.invalidate().await;
        Ok(())
    }

    /// (active, total)
    pub async fn formation_counts(&self) -> Result<(i64, i64), CatalogError> {
        Ok(self
            .formations
            .counts()
            .await
            .context("Failed to count formations")?)
    }

    // ========================================================================
    // Sessions (admin)
    // ========================================================================

    pub async fn list_sessions(
        &self,
        formation_id: Option<i64>,
    ) -> Result<Vec<TrainingSession>, CatalogError> {
        Ok(self
            .sessions
            .list(formation_id)
            .await
            .context("Failed to list sessions")?)
    }

    pub async fn get_session(&self, id: i64) -> Result<TrainingSession, CatalogError> {
        self.sessions
            .get_by_id(id)
            .await
            .context("Failed to get session")?
            .ok_or_else(|| session_not_found(id))
    }

    pub async fn create_session(
        &self,
        input: CreateSessionInput,
    ) -> Result<TrainingSession, CatalogError> {
        self.get_formation(input.formation_id).await.map_err(|e| match e {
            CatalogError::NotFound(msg) => CatalogError::Validation(msg),
            other => other,
        })?;

        let now = Utc::now();
        let session = TrainingSession {
            id: 0,
            formation_id: input.formation_id,
            start_date: input.start_date,
            end_date: input.end_date,
            location: input.location.trim().to_string(),
            max_participants: input.max_participants,
            current_participants: 0,
            price_eur: input.price_eur,
            price_chf: input.price_chf,
            is_open: input.is_open,
            created_at: now,
            updated_at: now,
        };
        validate_session(&session)?;

        let created = self
            .sessions
            .create(&session)
            .await
            .context("Failed to create session")?;
        tracing::info!(
            session_id = created.id,
            formation_id = created.formation_id,
            start_date = %created.start_date,
            "Session created"
        );
        self.invalidate().await;
        Ok(created)
    }

    pub async fn update_session(
        &self,
        id: i64,
        input: UpdateSessionInput,
    ) -> Result<TrainingSession, CatalogError> {
        let mut session = self.get_session(id).await?;
        let formation_changed = input
            .formation_id
            .is_some_and(|f| f != session.formation_id);
        input.apply(&mut session);

        if formation_changed {
            self.get_formation(session.formation_id)
                .await
                .map_err(|e| match e {
                    CatalogError::NotFound(msg) => CatalogError::Validation(msg),
                    other => other,
                })?;
        }
        validate_session(&session)?;
        if session.max_participants < session.current_participants {
            return Err(CatalogError::Validation(format!(
                "max_participants cannot be lower than the {} registered participant(s)",
                session.current_participants
            )));
        }

        // The guard in the UPDATE catches registrations that landed since the read
        if !self
            .sessions
            .update(&session)
            .await
            .context("Failed to update session")?
        {
            return Err(CatalogError::Conflict(
                "Session capacity changed concurrently, retry".to_string(),
            ));
        }

        self.invalidate().await;
        self.get_session(id).await
    }

    /// Refused while the session holds active registrations
    pub async fn delete_session(&self, id: i64) -> Result<(), CatalogError> {
        self.get_session(id).await?;

        let active = self
            .sessions
            .count_active_registrations(id)
            .await
            .context("Failed to count registrations")?;
        if active > 0 {
            return Err(CatalogError::Conflict(format!(
                "Session {} has {} active registration(s)",
                id, active
            )));
        }

        if !self
            .sessions
            .delete(id)
            .await
            .context("Failed to delete session")?
        {
            return Err(session_not_found(id));
        }
        tracing::info!(session_id = id, "Session deleted");
        self.invalidate().await;
        Ok(())
    }

    pub async fn count_upcoming_sessions(&self) -> Result<i64, CatalogError> {
        Ok(self
            .sessions
            .count_upcoming(today())
            .await
            .context("Failed to count upcoming sessions")?)
    }

    /// Drop cached catalog reads, for writes made outside this service
    /// such as seat changes
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(keys::CATALOG_ALL).await {
            tracing::warn!("Failed to invalidate catalog cache: {}", e);
        }
    }

    async fn resolve_formation_slug(
        &self,
        requested: Option<&str>,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, CatalogError> {
        let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => generate_slug(title),
        };
        if !is_valid_slug(&slug) {
            return Err(CatalogError::Validation(format!("Invalid slug '{}'", slug)));
        }
        if self
            .formations
            .slug_exists(&slug, exclude_id)
            .await
            .context("Failed to check slug uniqueness")?
        {
            return Err(CatalogError::Conflict(format!("Slug '{}' is already used", slug)));
        }
        Ok(slug)
    }

    async fn cached<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(key, "Cache read failed: {}", e);
                None
            }
        }
    }

    async fn store<T: Serialize + Send + Sync>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
    }
}

/// Upper bound for session prices in minor units (10 million per seat)
const MAX_PRICE: i64 = 1_000_000_000;

fn validate_session(session: &TrainingSession) -> Result<(), CatalogError> {
    if session.end_date < session.start_date {
        return Err(CatalogError::Validation(
            "end_date cannot be before start_date".to_string(),
        ));
    }
    if session.max_participants <= 0 {
        return Err(CatalogError::Validation(
            "max_participants must be greater than 0".to_string(),
        ));
    }
    if session.price_eur < 0 || session.price_chf < 0 {
        return Err(CatalogError::Validation("Prices cannot be negative".to_string()));
    }
    if session.price_eur > MAX_PRICE || session.price_chf > MAX_PRICE {
        return Err(CatalogError::Validation(format!(
            "Prices cannot exceed {} minor units",
            MAX_PRICE
        )));
    }
    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn formation_not_found(id: i64) -> CatalogError {
    CatalogError::NotFound(format!("Formation {} not found", id))
}

fn session_not_found(id: i64) -> CatalogError {
    CatalogError::NotFound(format!("Session {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{
        RegistrationRepository, SqlxFormationRepository, SqlxRegistrationRepository,
        SqlxTrainingSessionRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{Currency, NewRegistration, PaymentMethod};
    use chrono::Duration;

    async fn setup() -> (DynDatabasePool, CatalogService) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let service = CatalogService::new(
            SqlxFormationRepository::boxed(pool.clone()),
            SqlxTrainingSessionRepository::boxed(pool.clone()),
            create_cache(&CacheConfig::default()),
        );
        (pool, service)
    }

    fn formation_input(title: &str) -> CreateFormationInput {
        CreateFormationInput {
            slug: None,
            title: title.to_string(),
            description: "Description".to_string(),
            duration: "2 days".to_string(),
            category: "dev".to_string(),
            is_active: true,
        }
    }

    fn session_input(formation_id: i64, days_ahead: i64, max: i32) -> CreateSessionInput {
        let start = today() + Duration::days(days_ahead);
        CreateSessionInput {
            formation_id,
            start_date: start,
            end_date: start + Duration::days(1),
            location: "Lausanne".to_string(),
            max_participants: max,
            price_eur: 120_000,
            price_chf: 115_000,
            is_open: true,
        }
    }

    async fn register(pool: &DynDatabasePool, session_id: i64) {
        SqlxRegistrationRepository::new(pool.clone())
            .create(&NewRegistration {
                session_id,
                user_id: None,
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                phone: None,
                company: None,
                payment_method: PaymentMethod::Invoice,
                currency: Currency::Chf,
                amount: 100,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_formation_generates_slug() {
        let (_, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust avancé")).await.unwrap();
        assert_eq!(formation.slug, "rust-avance");

        let duplicate = service.create_formation(formation_input("Rust Avancé")).await;
        assert!(matches!(duplicate, Err(CatalogError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_formation_validation() {
        let (_, service) = setup().await;
        let empty = service.create_formation(formation_input("  ")).await;
        assert!(matches!(empty, Err(CatalogError::Validation(_))));

        let mut bad_slug = formation_input("Rust");
        bad_slug.slug = Some("Not A Slug".to_string());
        let result = service.create_formation(bad_slug).await;
        assert!(matches!(result, Err(CatalogError::Validation(_))));
    }

    #[tokio::test]
    async fn test_public_reads_hide_inactive_formations() {
        let (_, service) = setup().await;
        let active = service.create_formation(formation_input("Actif")).await.unwrap();
        let mut hidden = formation_input("Caché");
        hidden.is_active = false;
        let hidden = service.create_formation(hidden).await.unwrap();
        let hidden_session = service.create_session(session_input(hidden.id, 5, 10)).await.unwrap();

        let listed = service.list_formations(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);

        assert!(matches!(
            service.get_formation_by_slug(&hidden.slug).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            service.get_public_session(hidden_session.id).await,
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(service.list_all_formations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_formation_detail_lists_upcoming_sessions_only() {
        let (_, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust")).await.unwrap();
        service.create_session(session_input(formation.id, -10, 10)).await.unwrap();
        let upcoming = service.create_session(session_input(formation.id, 10, 10)).await.unwrap();

        let detail = service.get_formation_by_slug("rust").await.unwrap();
        assert_eq!(detail.sessions.len(), 1);
        assert_eq!(detail.sessions[0].id, upcoming.id);
    }

    #[tokio::test]
    async fn test_writes_invalidate_cached_reads() {
        let (_, service) = setup().await;
        assert!(service.list_formations(None).await.unwrap().is_empty());

        service.create_formation(formation_input("Rust")).await.unwrap();
        assert_eq!(service.list_formations(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_validation() {
        let (_, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust")).await.unwrap();

        let mut reversed = session_input(formation.id, 10, 10);
        reversed.end_date = reversed.start_date - Duration::days(1);
        let mut no_seats = session_input(formation.id, 10, 0);
        no_seats.max_participants = 0;
        let mut negative = session_input(formation.id, 10, 10);
        negative.price_chf = -1;
        let unknown_formation = session_input(9999, 10, 10);

        for input in [reversed, no_seats, negative, unknown_formation] {
            let result = service.create_session(input).await;
            assert!(matches!(result, Err(CatalogError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_capacity_cannot_drop_below_participants() {
        let (pool, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust")).await.unwrap();
        let session = service.create_session(session_input(formation.id, 10, 5)).await.unwrap();
        register(&pool, session.id).await;
        register(&pool, session.id).await;

        let result = service
            .update_session(
                session.id,
                UpdateSessionInput {
                    max_participants: Some(1),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(CatalogError::Validation(_))));

        let updated = service
            .update_session(
                session.id,
                UpdateSessionInput {
                    max_participants: Some(2),
                    location: Some("Genève".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.max_participants, 2);
        assert_eq!(updated.current_participants, 2);
        assert_eq!(updated.location, "Genève");
    }

    #[tokio::test]
    async fn test_delete_conflicts() {
        let (pool, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust")).await.unwrap();
        let session = service.create_session(session_input(formation.id, 10, 5)).await.unwrap();
        register(&pool, session.id).await;

        assert!(matches!(
            service.delete_formation(formation.id).await,
            Err(CatalogError::Conflict(_))
        ));
        assert!(matches!(
            service.delete_session(session.id).await,
            Err(CatalogError::Conflict(_))
        ));

        let empty = service.create_session(session_input(formation.id, 20, 5)).await.unwrap();
        service.delete_session(empty.id).await.unwrap();
        assert!(matches!(
            service.get_session(empty.id).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_formation_slug_conflict() {
        let (_, service) = setup().await;
        service.create_formation(formation_input("Rust")).await.unwrap();
        let other = service.create_formation(formation_input("Go")).await.unwrap();

        let result = service
            .update_formation(
                other.id,
                UpdateFormationInput {
                    slug: Some("rust".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(CatalogError::Conflict(_))));

        let renamed = service
            .update_formation(
                other.id,
                UpdateFormationInput {
                    title: Some("Go pour tous".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.slug, "go");
        assert_eq!(renamed.title, "Go pour tous");
    }

    #[tokio::test]
    async fn test_counts() {
        let (_, service) = setup().await;
        let formation = service.create_formation(formation_input("Rust")).await.unwrap();
        let mut inactive = formation_input("Old");
        inactive.is_active = false;
        service.create_formation(inactive).await.unwrap();
        service.create_session(session_input(formation.id, 3, 5)).await.unwrap();
        service.create_session(session_input(formation.id, -3, 5)).await.unwrap();

        assert_eq!(service.formation_counts().await.unwrap(), (1, 2));
        assert_eq!(service.count_upcoming_sessions().await.unwrap(), 1);
    }
}
