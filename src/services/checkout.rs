//! Checkout: pricing and payment gateway sessions
//!
//! A pending card registration is turned into a hosted checkout session. The
//! gateway sits behind [`PaymentGateway`] so tests can record calls instead
//! of reaching Stripe.

use crate::config::PaymentConfig;
use crate::db::repositories::RegistrationRepository;
use crate::models::{
    Currency, PaymentMethod, PaymentStatus, RegistrationDetail, RegistrationStatus, User,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Total price in minor units: `price` plus `vat_rate` percent, rounded half-up.
///
/// The rate is taken to two decimals (8.1 % is 810 basis points) so the
/// arithmetic stays in integers. Returns `None` when the total does not fit
/// in an `i64`.
pub fn compute_price(price: i64, vat_rate: f64) -> Option<i64> {
    let basis_points = (vat_rate * 100.0).round() as i128;
    let gross = i128::from(price).checked_mul(basis_points.checked_add(10_000)?)?;
    let total = if gross >= 0 {
        gross.checked_add(5_000)? / 10_000
    } else {
        -(gross.checked_neg()?.checked_add(5_000)? / 10_000)
    };
    i64::try_from(total).ok()
}

/// What the gateway needs to open a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub registration_id: i64,
    pub product_name: String,
    pub customer_email: String,
    pub currency: Currency,
    /// Minor units, VAT included
    pub amount: i64,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix timestamp after which the session expires
    pub expires_at: i64,
}

/// Checkout session as returned to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    #[serde(rename = "checkout_session_id")]
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

/// Stripe Checkout over the REST API
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorResponse {
    error: StripeErrorBody,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("vitrine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
        })
    }

    fn form_params(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("customer_email", request.customer_email.clone()),
            ("client_reference_id", request.registration_id.to_string()),
            ("expires_at", request.expires_at.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.code().to_string()),
            ("line_items[0][price_data][unit_amount]", request.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", request.product_name.clone()),
            ("metadata[registration_id]", request.registration_id.to_string()),
            ("payment_intent_data[metadata][registration_id]", request.registration_id.to_string()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            return Err(anyhow!("payment.stripe_secret_key is not configured"));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form_params(request))
            .send()
            .await
            .context("Checkout session request failed")?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(anyhow!("Payment gateway refused checkout session: {}", message));
        }

        let session: StripeSessionResponse = response
            .json()
            .await
            .context("Invalid checkout session response")?;
        let url = session
            .url
            .ok_or_else(|| anyhow!("Checkout session {} has no URL", session.id))?;
        Ok(CheckoutSession { id: session.id, url })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment gateway unavailable: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct CheckoutService {
    registrations: Arc<dyn RegistrationRepository>,
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentConfig,
}

impl CheckoutService {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            registrations,
            gateway,
            config,
        }
    }

    pub fn vat_rate(&self) -> f64 {
        self.config.vat_rate
    }

    /// Open a checkout session for a pending card registration.
    ///
    /// Members may only check out their own registrations. The amount is the
    /// one fixed when the registration was created.
    pub async fn create_session(
        &self,
        user: &User,
        registration_id: i64,
        currency: Option<Currency>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let detail = self
            .registrations
            .get_detail(registration_id)
            .await
            .context("Failed to get registration")?
            .ok_or_else(|| {
                CheckoutError::NotFound(format!("Registration {} not found", registration_id))
            })?;
        let registration = &detail.registration;

        if !user.can_access(registration.user_id) {
            return Err(CheckoutError::Forbidden(
                "Registration belongs to another account".to_string(),
            ));
        }
        if registration.payment_method != PaymentMethod::Card {
            return Err(CheckoutError::Validation(
                "Only card registrations can be paid online".to_string(),
            ));
        }
        if let Some(currency) = currency {
            if currency != registration.currency {
                return Err(CheckoutError::Validation(format!(
                    "Registration is priced in {}",
                    registration.currency.code().to_uppercase()
                )));
            }
        }
        if registration.status != RegistrationStatus::Pending
            || registration.payment_status != PaymentStatus::Pending
        {
            return Err(CheckoutError::Conflict(format!(
                "Registration is {} with payment {}",
                registration.status, registration.payment_status
            )));
        }

        let request = self.build_request(&detail);
        let session = self
            .gateway
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                tracing::error!(registration_id, "Checkout session creation failed: {:#}", e);
                CheckoutError::Gateway(e.to_string())
            })?;

        self.registrations
            .set_checkout_session(registration_id, &session.id)
            .await
            .context("Failed to store checkout session")?;

        tracing::info!(
            registration_id,
            checkout_session_id = %session.id,
            amount = request.amount,
            currency = %request.currency,
            "Checkout session created"
        );
        Ok(session)
    }

    fn build_request(&self, detail: &RegistrationDetail) -> CheckoutRequest {
        let registration = &detail.registration;
        let expires_at = Utc::now() + Duration::minutes(self.config.checkout_expiry_minutes);
        CheckoutRequest {
            registration_id: registration.id,
            product_name: format!(
                "{} ({})",
                detail.formation_title,
                detail.session_start_date.format("%d.%m.%Y")
            ),
            customer_email: registration.email.clone(),
            currency: registration.currency,
            amount: registration.amount,
            success_url: self.config.success_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
            expires_at: expires_at.timestamp(),
        }
    }
}
