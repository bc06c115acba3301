//! Payment webhook processing
//!
//! Stripe signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>`,
//! the HMAC-SHA256 of `"{t}.{body}"` under the endpoint secret. Verified
//! events drive registration payment transitions:
//!
//! - `checkout.session.completed`: paid and confirmed
//! - `checkout.session.expired`: payment expired, registration cancelled
//! - `payment_intent.canceled`: payment and registration cancelled
//!
//! Each transition is guarded in SQL, so a redelivered event changes nothing.

use crate::cache::{keys, CacheLayer, SharedCache};
use crate::db::repositories::RegistrationRepository;
use crate::models::{PaymentStatus, Registration, RegistrationStatus};
use crate::services::email::EmailService;
use anyhow::Context;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing or malformed signature header")]
    Malformed,

    #[error("Signature timestamp outside the tolerance window")]
    Expired,

    #[error("No signature matches the payload")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// Any of several `v1` entries may match, which is how the gateway signs
/// during secret rotation.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).abs() > tolerance_seconds {
        return Err(SignatureError::Expired);
    }

    for signature in signatures {
        let Ok(expected) = data_encoding::HEXLOWER_PERMISSIVE.decode(signature.as_bytes()) else {
            continue;
        };
        if signed_mac(payload, secret, timestamp)?
            .verify_slice(&expected)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

/// Signature header value for a payload, as the gateway would send it
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let digest = signed_mac(payload, secret, timestamp)?.finalize().into_bytes();
    Ok(format!(
        "t={},v1={}",
        timestamp,
        data_encoding::HEXLOWER.encode(&digest)
    ))
}

fn signed_mac(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// What an event did to the registration it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Registration not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct WebhookService {
    registrations: Arc<dyn RegistrationRepository>,
    email: Arc<EmailService>,
    cache: SharedCache,
    secret: String,
    tolerance_seconds: i64,
}

impl WebhookService {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        email: Arc<EmailService>,
        cache: SharedCache,
        secret: String,
        tolerance_seconds: i64,
    ) -> Self {
        Self {
            registrations,
            email,
            cache,
            secret,
            tolerance_seconds,
        }
    }

    /// Verify, parse and apply one delivery
    pub async fn handle(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let header = signature.ok_or(SignatureError::Malformed)?;
        verify_signature(
            header,
            payload,
            &self.secret,
            self.tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )?;

        let event: WebhookEvent =
            serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))?;
        self.apply(&event).await
    }

    /// Apply an already verified event
    pub async fn apply(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let object = &event.data.object;
        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.checkout_completed(object).await?,
            "checkout.session.expired" => {
                let registration = self.find_for_checkout(object).await?;
                self.release(&registration, PaymentStatus::Expired).await?
            }
            "payment_intent.canceled" => {
                let registration = self.find_for_payment_intent(object).await?;
                self.release(&registration, PaymentStatus::Cancelled).await?
            }
            other => {
                tracing::info!(event_id = %event.id, event_type = other, "Ignoring webhook event");
                WebhookOutcome::Ignored
            }
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = ?outcome,
            "Webhook event processed"
        );
        Ok(outcome)
    }

    async fn checkout_completed(
        &self,
        object: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        // Delayed payment methods complete the session before the money arrives
        if object.get("payment_status").and_then(|v| v.as_str()) == Some("unpaid") {
            return Ok(WebhookOutcome::Ignored);
        }

        let registration = self.find_for_checkout(object).await?;
        let payment_intent = object.get("payment_intent").and_then(|v| v.as_str());

        let applied = self
            .registrations
            .mark_paid(registration.id, payment_intent)
            .await
            .context("Failed to mark registration paid")?;
        if !applied {
            if registration.status == RegistrationStatus::Cancelled {
                tracing::warn!(
                    registration_id = registration.id,
                    "Payment completed for a cancelled registration, refund needed"
                );
            }
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        match self.registrations.get_detail(registration.id).await {
            Ok(Some(detail)) => {
                if let Err(e) = self.email.payment_confirmed(&detail).await {
                    tracing::error!(
                        registration_id = registration.id,
                        "Failed to send payment confirmation: {:#}",
                        e
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(registration_id = registration.id, "{:#}", e),
        }
        Ok(WebhookOutcome::Applied)
    }

    /// Cancel an unpaid registration and free its seat
    async fn release(
        &self,
        registration: &Registration,
        payment_status: PaymentStatus,
    ) -> Result<WebhookOutcome, WebhookError> {
        let applied = self
            .registrations
            .cancel_unpaid(registration.id, payment_status)
            .await
            .context("Failed to cancel registration")?;
        if !applied {
            let current = self
                .registrations
                .get_by_id(registration.id)
                .await
                .context("Failed to get registration")?;
            if current.map(|r| r.payment_status) == Some(PaymentStatus::Paid) {
                tracing::warn!(
                    registration_id = registration.id,
                    "Ignoring {} for a paid registration",
                    payment_status
                );
                return Ok(WebhookOutcome::Ignored);
            }
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        if let Err(e) = self.cache.delete_pattern(keys::CATALOG_ALL).await {
            tracing::warn!("Failed to invalidate catalog cache: {}", e);
        }
        Ok(WebhookOutcome::Applied)
    }

    /// Checkout session id first, then `client_reference_id`
    async fn find_for_checkout(
        &self,
        object: &serde_json::Value,
    ) -> Result<Registration, WebhookError> {
        if let Some(id) = object.get("id").and_then(|v| v.as_str()) {
            if let Some(registration) = self
                .registrations
                .find_by_checkout_session(id)
                .await
                .context("Failed to find registration by checkout session")?
            {
                return Ok(registration);
            }
        }

        let reference = object
            .get("client_reference_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok());
        self.find_by_reference(reference, object).await
    }

    /// Payment intent id first, then the `registration_id` metadata
    async fn find_for_payment_intent(
        &self,
        object: &serde_json::Value,
    ) -> Result<Registration, WebhookError> {
        if let Some(id) = object.get("id").and_then(|v| v.as_str()) {
            if let Some(registration) = self
                .registrations
                .find_by_payment_intent(id)
                .await
                .context("Failed to find registration by payment intent")?
            {
                return Ok(registration);
            }
        }

        let reference = object
            .pointer("/metadata/registration_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok());
        self.find_by_reference(reference, object).await
    }

    async fn find_by_reference(
        &self,
        reference: Option<i64>,
        object: &serde_json::Value,
    ) -> Result<Registration, WebhookError> {
        let object_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<none>")
            .to_string();
        let Some(id) = reference else {
            return Err(WebhookError::NotFound(object_id));
        };
        self.registrations
            .get_by_id(id)
            .await
            .context("Failed to get registration")?
            .ok_or(WebhookError::NotFound(object_id))
    }
}
