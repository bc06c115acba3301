//! Configuration management
//!
//! This module handles loading and parsing configuration for Vitrine.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

// ============================================================================
// Server
// ============================================================================

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Public base URL of the site, used in emails and payment redirects
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

// ============================================================================
// Database
// ============================================================================

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/vitrine.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

// ============================================================================
// Cache
// ============================================================================

/// In-process cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

// ============================================================================
// Remote storage
// ============================================================================

/// Remote file store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage driver (webdav or memory)
    #[serde(default)]
    pub driver: StorageDriver,
    /// WebDAV endpoint, e.g. `https://webdav.hidrive.strato.com`
    #[serde(default = "default_storage_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Root collection every relative path is resolved against
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Directory (relative to root) for uploaded images
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    /// Directory (relative to root) for uploaded audio
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
    /// Timeout for non-audio reads
    #[serde(default = "default_storage_timeout")]
    pub timeout_seconds: u64,
    /// Timeout for audio reads
    #[serde(default = "default_audio_timeout")]
    pub audio_timeout_seconds: u64,
    /// Upper bound of a single partial-content response, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// `Retry-After` hint sent when an audio read fails
    #[serde(default = "default_retry_after")]
    pub retry_after_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            base_url: default_storage_base_url(),
            username: String::new(),
            password: String::new(),
            root: default_storage_root(),
            image_dir: default_image_dir(),
            audio_dir: default_audio_dir(),
            timeout_seconds: default_storage_timeout(),
            audio_timeout_seconds: default_audio_timeout(),
            chunk_size: default_chunk_size(),
            retry_after_seconds: default_retry_after(),
        }
    }
}

fn default_storage_base_url() -> String {
    "https://webdav.hidrive.strato.com".to_string()
}

fn default_storage_root() -> String {
    "/public".to_string()
}

fn default_image_dir() -> String {
    "images".to_string()
}

fn default_audio_dir() -> String {
    "podcasts".to_string()
}

fn default_storage_timeout() -> u64 {
    15
}

fn default_audio_timeout() -> u64 {
    60
}

fn default_chunk_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_retry_after() -> u64 {
    5
}

/// Storage driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    /// Remote WebDAV store (default)
    #[default]
    Webdav,
    /// In-process store, for development
    Memory,
}

// ============================================================================
// Upload
// ============================================================================

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum image size in bytes (default: 10MB)
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,
    /// Maximum audio size in bytes (default: 200MB)
    #[serde(default = "default_max_audio_size")]
    pub max_audio_size: u64,
    /// Allowed image MIME types
    #[serde(default = "default_image_types")]
    pub image_types: Vec<String>,
    /// Allowed audio MIME types
    #[serde(default = "default_audio_types")]
    pub audio_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_image_size: default_max_image_size(),
            max_audio_size: default_max_audio_size(),
            image_types: default_image_types(),
            audio_types: default_audio_types(),
        }
    }
}

fn default_max_image_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_audio_size() -> u64 {
    200 * 1024 * 1024 // 200MB
}

fn default_image_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/gif".to_string(),
        "image/webp".to_string(),
        "image/svg+xml".to_string(),
    ]
}

fn default_audio_types() -> Vec<String> {
    vec![
        "audio/mpeg".to_string(),
        "audio/mp4".to_string(),
        "audio/x-m4a".to_string(),
        "audio/wav".to_string(),
        "audio/ogg".to_string(),
    ]
}

impl UploadConfig {
    pub fn is_image_allowed(&self, mime_type: &str) -> bool {
        self.image_types.iter().any(|t| t == mime_type)
    }

    pub fn is_audio_allowed(&self, mime_type: &str) -> bool {
        self.audio_types.iter().any(|t| t == mime_type)
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Payment gateway configuration (Stripe)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub stripe_secret_key: String,
    /// Signing secret of the webhook endpoint (`whsec_...`)
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Redirect after a successful checkout; `{CHECKOUT_SESSION_ID}` is kept verbatim
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    /// VAT rate in percent, applied on top of session prices
    #[serde(default = "default_vat_rate")]
    pub vat_rate: f64,
    /// Maximum accepted age of a webhook signature
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_seconds: i64,
    /// Lifetime of a checkout session (Stripe accepts 30 minutes to 24 hours)
    #[serde(default = "default_checkout_expiry")]
    pub checkout_expiry_minutes: i64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: String::new(),
            webhook_secret: String::new(),
            api_base: default_stripe_api_base(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            vat_rate: default_vat_rate(),
            webhook_tolerance_seconds: default_webhook_tolerance(),
            checkout_expiry_minutes: default_checkout_expiry(),
        }
    }
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_success_url() -> String {
    "http://localhost:3000/inscription/succes?session_id={CHECKOUT_SESSION_ID}".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/inscription/annulee".to_string()
}

fn default_vat_rate() -> f64 {
    8.1
}

fn default_webhook_tolerance() -> i64 {
    300
}

fn default_checkout_expiry() -> i64 {
    60
}

// ============================================================================
// Email
// ============================================================================

/// SMTP configuration for transactional emails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// When false, emails are logged instead of sent
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Recipient of admin notifications and contact messages
    #[serde(default = "default_admin_address")]
    pub admin_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            from_name: default_from_name(),
            admin_address: default_admin_address(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "no-reply@localhost".to_string()
}

fn default_from_name() -> String {
    "Vitrine".to_string()
}

fn default_admin_address() -> String {
    "admin@localhost".to_string()
}

// ============================================================================
// Auth & access
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a login session in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
        }
    }
}

fn default_session_days() -> i64 {
    7
}

/// Path-prefix allow/deny lists evaluated by the access gate.
///
/// The longest matching prefix decides; paths matching nothing are public.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_public_paths")]
    pub public: Vec<String>,
    #[serde(default = "default_authenticated_paths")]
    pub authenticated: Vec<String>,
    #[serde(default = "default_admin_paths")]
    pub admin: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            public: default_public_paths(),
            authenticated: default_authenticated_paths(),
            admin: default_admin_paths(),
        }
    }
}

fn default_public_paths() -> Vec<String> {
    vec![
        "/api/v1/auth/login".to_string(),
        "/api/v1/auth/register".to_string(),
        "/api/v1/webhooks".to_string(),
        "/api/hidrive/files".to_string(),
    ]
}

fn default_authenticated_paths() -> Vec<String> {
    vec![
        "/api/v1/auth".to_string(),
        "/api/v1/registrations".to_string(),
        "/api/v1/checkout".to_string(),
    ]
}

fn default_admin_paths() -> Vec<String> {
    vec!["/api/v1/admin".to_string()]
}

// ============================================================================
// Loading
// ============================================================================

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `VITRINE_<SECTION>_<FIELD>`,
    /// e.g. `VITRINE_SERVER_PORT`, `VITRINE_PAYMENT_WEBHOOK_SECRET`.
    pub fn load_with_env(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "storage.chunk_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..100.0).contains(&self.payment.vat_rate) {
            return Err(ConfigError::ValidationError(format!(
                "payment.vat_rate must be a percentage in [0, 100), got {}",
                self.payment.vat_rate
            )));
        }
        if self.email.enabled && self.email.smtp_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "email.smtp_host is required when email is enabled".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        // Server
        override_string("VITRINE_SERVER_HOST", &mut self.server.host);
        override_parsed("VITRINE_SERVER_PORT", &mut self.server.port);
        override_string("VITRINE_SERVER_CORS_ORIGIN", &mut self.server.cors_origin);
        override_string("VITRINE_SERVER_PUBLIC_URL", &mut self.server.public_url);

        // Database
        if let Ok(driver) = std::env::var("VITRINE_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        override_string("VITRINE_DATABASE_URL", &mut self.database.url);

        // Cache
        override_parsed("VITRINE_CACHE_TTL_SECONDS", &mut self.cache.ttl_seconds);

        // Storage
        if let Ok(driver) = std::env::var("VITRINE_STORAGE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "webdav" => self.storage.driver = StorageDriver::Webdav,
                "memory" => self.storage.driver = StorageDriver::Memory,
                _ => {}
            }
        }
        override_string("VITRINE_STORAGE_BASE_URL", &mut self.storage.base_url);
        override_string("VITRINE_STORAGE_USERNAME", &mut self.storage.username);
        override_string("VITRINE_STORAGE_PASSWORD", &mut self.storage.password);
        override_string("VITRINE_STORAGE_ROOT", &mut self.storage.root);

        // Payment
        override_string("VITRINE_PAYMENT_STRIPE_SECRET_KEY", &mut self.payment.stripe_secret_key);
        override_string("VITRINE_PAYMENT_WEBHOOK_SECRET", &mut self.payment.webhook_secret);
        override_string("VITRINE_PAYMENT_SUCCESS_URL", &mut self.payment.success_url);
        override_string("VITRINE_PAYMENT_CANCEL_URL", &mut self.payment.cancel_url);
        override_parsed("VITRINE_PAYMENT_VAT_RATE", &mut self.payment.vat_rate);

        // Email
        override_parsed("VITRINE_EMAIL_ENABLED", &mut self.email.enabled);
        override_string("VITRINE_EMAIL_SMTP_HOST", &mut self.email.smtp_host);
        override_parsed("VITRINE_EMAIL_SMTP_PORT", &mut self.email.smtp_port);
        override_string("VITRINE_EMAIL_USERNAME", &mut self.email.username);
        override_string("VITRINE_EMAIL_PASSWORD", &mut self.email.password);
        override_string("VITRINE_EMAIL_FROM_ADDRESS", &mut self.email.from_address);
        override_string("VITRINE_EMAIL_ADMIN_ADDRESS", &mut self.email.admin_address);
    }
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *target = value;
    }
}

/// Unparseable values are ignored and the file value is kept
fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse::<T>() {
            *target = parsed;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.database.url, "data/vitrine.db");
        assert_eq!(config.storage.driver, StorageDriver::Webdav);
        assert_eq!(config.storage.chunk_size, 1024 * 1024);
        assert_eq!(config.storage.audio_timeout_seconds, 60);
        assert_eq!(config.storage.timeout_seconds, 15);
        assert_eq!(config.payment.webhook_tolerance_seconds, 300);
        assert!(!config.email.enabled);
        assert_eq!(config.access.admin, vec!["/api/v1/admin".to_string()]);
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.session_days, 7);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "storage:\n  driver: memory\n  chunk_size: 4096\npayment:\n  vat_rate: 7.7\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.storage.driver, StorageDriver::Memory);
        assert_eq!(config.storage.chunk_size, 4096);
        assert_eq!(config.storage.image_dir, "images");
        assert!((config.payment.vat_rate - 7.7).abs() < f64::EPSILON);
        assert_eq!(config.payment.api_base, "https://api.stripe.com");
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("parse"));
        assert!(err.contains("line"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.storage.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_rejects_enabled_email_without_host() {
        let mut config = Config::default();
        config.email.enabled = true;
        assert!(config.validate().is_err());

        config.email.smtp_host = "smtp.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_type_checks() {
        let config = UploadConfig::default();
        assert!(config.is_image_allowed("image/png"));
        assert!(!config.is_image_allowed("audio/mpeg"));
        assert!(config.is_audio_allowed("audio/mpeg"));
        assert!(!config.is_audio_allowed("application/zip"));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = lock_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("VITRINE_SERVER_PORT", "4000");
        std::env::set_var("VITRINE_STORAGE_DRIVER", "memory");
        std::env::set_var("VITRINE_PAYMENT_WEBHOOK_SECRET", "whsec_test");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.storage.driver, StorageDriver::Memory);
        assert_eq!(config.payment.webhook_secret, "whsec_test");

        std::env::remove_var("VITRINE_SERVER_PORT");
        std::env::remove_var("VITRINE_STORAGE_DRIVER");
        std::env::remove_var("VITRINE_PAYMENT_WEBHOOK_SECRET");
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _guard = lock_env();

        std::env::set_var("VITRINE_SERVER_PORT", "not-a-port");
        std::env::set_var("VITRINE_DATABASE_DRIVER", "postgres");

        let config = Config::load_with_env(Path::new("nonexistent_config.yml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.driver, DatabaseDriver::Sqlite);

        std::env::remove_var("VITRINE_SERVER_PORT");
        std::env::remove_var("VITRINE_DATABASE_DRIVER");
    }
}
