//! Admin dashboard aggregates

use crate::db::repositories::RegistrationStats;
use crate::services::blog::BlogService;
use crate::services::catalog::CatalogService;
use crate::services::podcast::PodcastService;
use crate::services::registration::RegistrationService;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time copy of the in-process request counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RequestSnapshot {
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormationCounts {
    pub active: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub formations: FormationCounts,
    pub upcoming_sessions: i64,
    pub registrations: RegistrationStats,
    pub total_plays: i64,
    pub published_blogs: i64,
    pub requests: RequestSnapshot,
    pub uptime_formatted: String,
}

pub struct DashboardService {
    catalog: Arc<CatalogService>,
    registrations: Arc<RegistrationService>,
    podcasts: Arc<PodcastService>,
    blogs: Arc<BlogService>,
}

impl DashboardService {
    pub fn new(
        catalog: Arc<CatalogService>,
        registrations: Arc<RegistrationService>,
        podcasts: Arc<PodcastService>,
        blogs: Arc<BlogService>,
    ) -> Self {
        Self {
            catalog,
            registrations,
            podcasts,
            blogs,
        }
    }

    pub async fn summary(&self, requests: RequestSnapshot) -> anyhow::Result<DashboardSummary> {
        let (active, total) = self
            .catalog
            .formation_counts()
            .await
            .context("Failed to count formations")?;
        let upcoming_sessions = self
            .catalog
            .count_upcoming_sessions()
            .await
            .context("Failed to count upcoming sessions")?;
        let registrations = self
            .registrations
            .stats()
            .await
            .context("Failed to load registration stats")?;
        let total_plays = self
            .podcasts
            .total_plays()
            .await
            .context("Failed to sum podcast plays")?;
        let published_blogs = self
            .blogs
            .count_published()
            .await
            .context("Failed to count published blogs")?;

        Ok(DashboardSummary {
            formations: FormationCounts { active, total },
            upcoming_sessions,
            registrations,
            total_plays,
            published_blogs,
            uptime_formatted: format_uptime(requests.uptime_seconds),
            requests,
        })
    }
}

/// Format uptime as "1d 2h", "3h 4m" or "5m"
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
