//! Database repositories
//!
//! One repository per aggregate. Each exposes a trait and an sqlx
//! implementation that dispatches on the configured driver.

pub mod blog;
pub mod formation;
pub mod podcast;
pub mod registration;
pub mod session;
pub mod training_session;
pub mod user;

pub use blog::{BlogRepository, SqlxBlogRepository};
pub use formation::{FormationRepository, SqlxFormationRepository};
pub use podcast::{PodcastRepository, SqlxPodcastRepository};
pub use registration::{
    RegistrationRepository, RegistrationStats, ReserveOutcome, SqlxRegistrationRepository,
};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use training_session::{SqlxTrainingSessionRepository, TrainingSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
