//! Training catalog: formations (courses) and their dated sessions

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Currency;

/// A training course offered by the firm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: String,
    /// Free text such as "2 days"
    pub duration: String,
    pub category: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFormationInput {
    /// Derived from the title when omitted
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFormationInput {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateFormationInput {
    pub fn apply(self, formation: &mut Formation) {
        if let Some(slug) = self.slug {
            formation.slug = slug;
        }
        if let Some(title) = self.title {
            formation.title = title;
        }
        if let Some(description) = self.description {
            formation.description = description;
        }
        if let Some(duration) = self.duration {
            formation.duration = duration;
        }
        if let Some(category) = self.category {
            formation.category = category;
        }
        if let Some(is_active) = self.is_active {
            formation.is_active = is_active;
        }
    }
}

/// Formation with its upcoming open sessions, as served publicly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationDetail {
    #[serde(flatten)]
    pub formation: Formation,
    pub sessions: Vec<TrainingSession>,
}

/// A dated offering of a formation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: i64,
    pub formation_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub location: String,
    pub max_participants: i32,
    pub current_participants: i32,
    /// Price in euro cents, VAT excluded
    pub price_eur: i64,
    /// Price in rappen, VAT excluded
    pub price_chf: i64,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingSession {
    pub fn seats_left(&self) -> i32 {
        (self.max_participants - self.current_participants).max(0)
    }

    /// Open and not yet full
    pub fn accepts_registrations(&self) -> bool {
        self.is_open && self.current_participants < self.max_participants
    }

    pub fn price_for(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Eur => self.price_eur,
            Currency::Chf => self.price_chf,
        }
    }
}

/// Session joined with its formation title/slug, as listed publicly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWithFormation {
    #[serde(flatten)]
    pub session: TrainingSession,
    pub formation_slug: String,
    pub formation_title: String,
    pub seats_left: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionInput {
    pub formation_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub location: String,
    pub max_participants: i32,
    #[serde(default)]
    pub price_eur: i64,
    #[serde(default)]
    pub price_chf: i64,
    #[serde(default = "default_true")]
    pub is_open: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSessionInput {
    pub formation_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub max_participants: Option<i32>,
    pub price_eur: Option<i64>,
    pub price_chf: Option<i64>,
    pub is_open: Option<bool>,
}

impl UpdateSessionInput {
    pub fn apply(self, session: &mut TrainingSession) {
        if let Some(formation_id) = self.formation_id {
            session.formation_id = formation_id;
        }
        if let Some(start_date) = self.start_date {
            session.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            session.end_date = end_date;
        }
        if let Some(location) = self.location {
            session.location = location;
        }
        if let Some(max_participants) = self.max_participants {
            session.max_participants = max_participants;
        }
        if let Some(price_eur) = self.price_eur {
            session.price_eur = price_eur;
        }
        if let Some(price_chf) = self.price_chf {
            session.price_chf = price_chf;
        }
        if let Some(is_open) = self.is_open {
            session.is_open = is_open;
        }
    }
}

fn default_true() -> bool {
    true
}
