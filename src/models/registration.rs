//! Registration of a participant to a training session

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Paid online through a checkout session
    Card,
    /// Paid by bank transfer, confirmed by an admin
    Invoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Chf,
    Eur,
}

impl Currency {
    /// ISO 4217 code in lowercase, as the payment gateway expects it
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Chf => "chf",
            Currency::Eur => "eur",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::Invoice => write!(f, "invoice"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "invoice" => Ok(PaymentMethod::Invoice),
            _ => Err(anyhow::anyhow!("Invalid payment method: {}", s)),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Expired => write!(f, "expired"),
            PaymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "expired" => Ok(PaymentStatus::Expired),
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid payment status: {}", s)),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "pending"),
            RegistrationStatus::Confirmed => write!(f, "confirmed"),
            RegistrationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RegistrationStatus::Pending),
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(RegistrationStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid registration status: {}", s)),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chf" => Ok(Currency::Chf),
            "eur" => Ok(Currency::Eur),
            _ => Err(anyhow::anyhow!("Unsupported currency: {}", s)),
        }
    }
}

/// A participant's registration to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub session_id: i64,
    pub user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: RegistrationStatus,
    pub currency: Currency,
    /// Amount in minor units, VAT included
    pub amount: i64,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Every registration that is not cancelled counts against session capacity
    pub fn holds_seat(&self) -> bool {
        self.status != RegistrationStatus::Cancelled
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Registration joined with the session and formation it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationDetail {
    #[serde(flatten)]
    pub registration: Registration,
    pub formation_title: String,
    pub session_start_date: NaiveDate,
    pub session_end_date: NaiveDate,
    pub session_location: String,
}

/// Fields supplied by the participant
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRegistrationInput {
    pub session_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub currency: Currency,
}

/// Row to insert, after pricing
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub session_id: i64,
    pub user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub payment_method: PaymentMethod,
    pub currency: Currency,
    pub amount: i64,
}

/// Status changes an admin may apply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRegistrationInput {
    pub status: Option<RegistrationStatus>,
    pub payment_status: Option<PaymentStatus>,
}

/// Filters for the admin listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationFilter {
    pub session_id: Option<i64>,
    pub status: Option<RegistrationStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_through_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Expired,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(PaymentStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert_eq!(
            RegistrationStatus::from_str("canceled").unwrap(),
            RegistrationStatus::Cancelled
        );
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!(Currency::from_str("EUR").unwrap(), Currency::Eur);
        assert_eq!(Currency::Chf.code(), "chf");
        assert!(Currency::from_str("usd").is_err());
    }

    #[test]
    fn test_create_input_defaults_currency() {
        let input: CreateRegistrationInput = serde_json::from_str(
            r#"{"session_id": 1, "first_name": "Ada", "last_name": "Lovelace",
                "email": "ada@example.com", "payment_method": "invoice"}"#,
        )
        .unwrap();
        assert_eq!(input.currency, Currency::Chf);
        assert_eq!(input.payment_method, PaymentMethod::Invoice);
        assert!(input.phone.is_none());
    }
}
