//! Services layer - Business logic
//!
//! Services validate input, coordinate repositories with the cache and
//! outbound integrations (payment gateway, email), and map failures to
//! typed errors for the API layer.

pub mod blog;
pub mod catalog;
pub mod checkout;
pub mod dashboard;
pub mod email;
pub mod markdown;
pub mod password;
pub mod podcast;
pub mod rate_limiter;
pub mod registration;
pub mod slug;
pub mod user;
pub mod webhook;

pub use blog::{BlogService, BlogServiceError};
pub use catalog::{CatalogError, CatalogService};
pub use checkout::{
    compute_price, CheckoutError, CheckoutService, PaymentGateway, StripeGateway,
};
pub use dashboard::{DashboardService, DashboardSummary, RequestSnapshot};
pub use email::EmailService;
pub use markdown::MarkdownRenderer;
pub use password::{hash_password, verify_password};
pub use podcast::{PodcastService, PodcastServiceError};
pub use rate_limiter::{ContactRateLimiter, LoginRateLimiter};
pub use registration::{RegistrationService, RegistrationServiceError};
pub use slug::{generate_slug, is_valid_slug};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
pub use webhook::{WebhookError, WebhookOutcome, WebhookService};
