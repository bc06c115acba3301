//! Transactional email
//!
//! Plain-text notifications sent over SMTP with lettre. With `email.enabled`
//! off the messages are logged and kept in an in-memory outbox instead.

use crate::config::EmailConfig;
use crate::models::{Currency, RegistrationDetail};
use anyhow::{anyhow, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Messages kept by the log-only transport
const OUTBOX_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Message from the public contact form
#[derive(Debug, Clone, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    pub subject: String,
    pub message: String,
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    LogOnly(Mutex<Vec<OutgoingEmail>>),
}

pub struct EmailService {
    config: EmailConfig,
    transport: Transport,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = if config.enabled {
            if config.smtp_host.is_empty() {
                return Err(anyhow!("Email is enabled but email.smtp_host is empty"));
            }
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
                .port(config.smtp_port);
            if !config.username.is_empty() {
                builder = builder.credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ));
            }
            Transport::Smtp(builder.build())
        } else {
            Transport::LogOnly(Mutex::new(Vec::new()))
        };
        Ok(Self { config, transport })
    }

    /// Service that only logs, for development and tests
    pub fn log_only() -> Self {
        Self {
            config: EmailConfig::default(),
            transport: Transport::LogOnly(Mutex::new(Vec::new())),
        }
    }

    pub fn admin_address(&self) -> &str {
        &self.config.admin_address
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<()> {
        match &self.transport {
            Transport::Smtp(mailer) => {
                let message = self.build_message(&email)?;
                mailer
                    .send(message)
                    .await
                    .map_err(|e| anyhow!("Failed to send email: {}", e))?;
                tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
            }
            Transport::LogOnly(outbox) => {
                tracing::info!(
                    to = %email.to,
                    subject = %email.subject,
                    "Email delivery disabled, message logged"
                );
                if let Ok(mut outbox) = outbox.lock() {
                    if outbox.len() >= OUTBOX_LIMIT {
                        outbox.remove(0);
                    }
                    outbox.push(email);
                }
            }
        }
        Ok(())
    }

    /// Messages captured while delivery is disabled
    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        match &self.transport {
            Transport::LogOnly(outbox) => outbox.lock().map(|o| o.clone()).unwrap_or_default(),
            Transport::Smtp(_) => Vec::new(),
        }
    }

    pub async fn registration_received(&self, detail: &RegistrationDetail) -> Result<()> {
        let r = &detail.registration;
        let payment = match r.payment_method {
            crate::models::PaymentMethod::Card => {
                "Your seat is reserved until the online payment is completed."
            }
            crate::models::PaymentMethod::Invoice => {
                "An invoice will follow; your seat is confirmed once it is paid."
            }
        };
        self.send(OutgoingEmail {
            to: r.email.clone(),
            reply_to: None,
            subject: format!("Registration received: {}", detail.formation_title),
            body: format!(
                "Hello {},\n\nWe received your registration for \"{}\" ({}, {}).\n\
                 Amount: {}\n\n{}\n\n{}",
                r.first_name,
                detail.formation_title,
                session_dates(detail),
                detail.session_location,
                format_amount(r.amount, r.currency),
                payment,
                self.config.from_name,
            ),
        })
        .await
    }

    pub async fn registration_admin_notice(&self, detail: &RegistrationDetail) -> Result<()> {
        let r = &detail.registration;
        self.send(OutgoingEmail {
            to: self.config.admin_address.clone(),
            reply_to: Some(r.email.clone()),
            subject: format!("New registration #{}: {}", r.id, detail.formation_title),
            body: format!(
                "Participant: {} <{}>\nPhone: {}\nCompany: {}\nSession: {} ({}, {})\n\
                 Payment: {} / {}\nAmount: {}",
                r.full_name(),
                r.email,
                r.phone.as_deref().unwrap_or("-"),
                r.company.as_deref().unwrap_or("-"),
                detail.formation_title,
                session_dates(detail),
                detail.session_location,
                r.payment_method,
                r.payment_status,
                format_amount(r.amount, r.currency),
            ),
        })
        .await
    }

    pub async fn payment_confirmed(&self, detail: &RegistrationDetail) -> Result<()> {
        let r = &detail.registration;
        self.send(OutgoingEmail {
            to: r.email.clone(),
            reply_to: None,
            subject: format!("Payment confirmed: {}", detail.formation_title),
            body: format!(
                "Hello {},\n\nWe received your payment of {}. Your seat for \"{}\" ({}, {}) \
                 is confirmed.\n\n{}",
                r.first_name,
                format_amount(r.amount, r.currency),
                detail.formation_title,
                session_dates(detail),
                detail.session_location,
                self.config.from_name,
            ),
        })
        .await
    }

    pub async fn contact(&self, message: &ContactMessage) -> Result<()> {
        self.send(OutgoingEmail {
            to: self.config.admin_address.clone(),
            reply_to: Some(message.email.clone()),
            subject: format!("[Contact] {}", message.subject),
            body: format!(
                "From: {} <{}>\nCompany: {}\n\n{}",
                message.name,
                message.email,
                message.company.as_deref().unwrap_or("-"),
                message.message,
            ),
        })
        .await
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_address)
            .parse()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;
        let mut builder = Message::builder()
            .from(from)
            .to(email
                .to
                .parse()
                .map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(
                reply_to
                    .parse()
                    .map_err(|e| anyhow!("Invalid reply-to address: {}", e))?,
            );
        }
        builder
            .body(email.body.clone())
            .map_err(|e| anyhow!("Failed to build email: {}", e))
    }
}

fn session_dates(detail: &RegistrationDetail) -> String {
    if detail.session_start_date == detail.session_end_date {
        detail.session_start_date.format("%d.%m.%Y").to_string()
    } else {
        format!(
            "{} - {}",
            detail.session_start_date.format("%d.%m.%Y"),
            detail.session_end_date.format("%d.%m.%Y")
        )
    }
}

/// `51888` CHF becomes `CHF 518.88`
pub fn format_amount(amount: i64, currency: Currency) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{} {}{}.{:02}",
        currency.code().to_uppercase(),
        sign,
        abs / 100,
        abs % 100
    )
}
