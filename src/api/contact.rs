//! Contact form endpoint
//!
//! - POST /api/v1/contact - Forward a message to the site admin

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;

use crate::api::middleware::{client_ip, ApiError, AppState};
use crate::services::email::ContactMessage;
use crate::services::user::is_valid_email;

const MAX_NAME_LENGTH: usize = 200;
const MAX_SUBJECT_LENGTH: usize = 200;
const MAX_MESSAGE_LENGTH: usize = 5000;

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub sent: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(send_contact))
}

/// POST /api/v1/contact
///
/// Limited to 5 messages per IP per hour.
async fn send_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ContactMessage>,
) -> Result<(StatusCode, Json<ContactResponse>), ApiError> {
    let message = validate(body)?;

    if let Some(ip) = client_ip(&headers) {
        if !state.contact_limiter.try_acquire(ip).await {
            tracing::warn!(%ip, "Contact form rate limit exceeded");
            return Err(ApiError::rate_limited(
                "Too many messages, try again later",
                3600,
            ));
        }
    }

    state.email_service.contact(&message).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to forward contact message");
        ApiError::unavailable("Message could not be sent, try again later")
    })?;

    tracing::info!(email = %message.email, "Contact message forwarded");
    Ok((StatusCode::ACCEPTED, Json(ContactResponse { sent: true })))
}

fn validate(body: ContactMessage) -> Result<ContactMessage, ApiError> {
    let message = ContactMessage {
        name: body.name.trim().to_string(),
        email: body.email.trim().to_lowercase(),
        company: body
            .company
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        subject: body.subject.trim().to_string(),
        message: body.message.trim().to_string(),
    };

    if message.name.is_empty() || message.name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::validation_error(format!(
            "Name is required and must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    if !is_valid_email(&message.email) {
        return Err(ApiError::validation_error("Invalid email address"));
    }
    if message.subject.is_empty() || message.subject.chars().count() > MAX_SUBJECT_LENGTH {
        return Err(ApiError::validation_error(format!(
            "Subject is required and must be at most {} characters",
            MAX_SUBJECT_LENGTH
        )));
    }
    if message.message.is_empty() || message.message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::validation_error(format!(
            "Message is required and must be at most {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> ContactMessage {
        ContactMessage {
            name: " Ada Lovelace ".to_string(),
            email: "Ada@Example.com".to_string(),
            company: Some("  ".to_string()),
            subject: "Training".to_string(),
            message: "Do you run sessions in Geneva?".to_string(),
        }
    }

    #[test]
    fn test_validate_normalizes_fields() {
        let validated = validate(message()).unwrap();
        assert_eq!(validated.name, "Ada Lovelace");
        assert_eq!(validated.email, "ada@example.com");
        assert_eq!(validated.company, None);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut bad = message();
        bad.email = "not-an-email".to_string();
        assert_eq!(validate(bad).unwrap_err().error.code, "VALIDATION_ERROR");

        let mut empty = message();
        empty.subject = "   ".to_string();
        assert!(validate(empty).is_err());

        let mut long = message();
        long.message = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(validate(long).is_err());
    }
}
