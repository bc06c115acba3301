//! Data models
//!
//! Database entities (users, login sessions, formations, training sessions,
//! registrations, blogs, podcasts) and the input types the API accepts.

mod blog;
mod formation;
mod podcast;
mod registration;
mod session;
mod user;

pub use blog::{
    Blog, BlogContent, BlogDetail, BlogSection, ContentInput, ContentKind, CreateBlogInput,
    NewContent, NewSection, PagedResult, SectionInput, UpdateBlogInput,
};
pub use formation::{
    CreateFormationInput, CreateSessionInput, Formation, FormationDetail, SessionWithFormation,
    TrainingSession, UpdateFormationInput, UpdateSessionInput,
};
pub use podcast::{
    CreateEpisodeInput, CreatePodcastInput, Episode, EpisodeView, PlayCount, Podcast,
    PodcastDetail, UpdateEpisodeInput, UpdatePodcastInput,
};
pub use registration::{
    CreateRegistrationInput, Currency, NewRegistration, PaymentMethod, PaymentStatus,
    Registration, RegistrationDetail, RegistrationFilter, RegistrationStatus,
    UpdateRegistrationInput,
};
pub use session::AuthSession;
pub use user::{User, UserRole};
