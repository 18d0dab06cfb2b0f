use askama::Template;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{config::EmailConfig, error::AppError, models::AppointmentRow, templates};

#[derive(Clone)]
pub struct Mailer {
    config: EmailConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Template)]
#[template(path = "emails/booking_received.html")]
pub struct BookingReceivedEmail {
    pub client_name: String,
    pub business_name: String,
    pub service_name: String,
    pub start_time: String,
    pub deposit: String,
    pub has_deposit: bool,
}

#[derive(Template)]
#[template(path = "emails/new_booking.html")]
pub struct NewBookingEmail {
    pub professional_name: String,
    pub client_name: String,
    pub service_name: String,
    pub start_time: String,
    pub dashboard_url: String,
}

#[derive(Template)]
#[template(path = "emails/status_changed.html")]
pub struct StatusChangedEmail {
    pub client_name: String,
    pub service_name: String,
    pub start_time: String,
    pub status: String,
}

#[derive(Template)]
#[template(path = "emails/lead_invitation.html")]
pub struct LeadInvitationEmail {
    pub lead_name: String,
    pub business_name: String,
    pub invitation_url: String,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&OutgoingEmail {
                from: &self.config.from,
                to: [to],
                subject,
                html,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!("email API returned {status}: {body}")));
        }
        Ok(())
    }
}

pub async fn send_template<T: Template>(mailer: &Mailer, to: &str, subject: &str, template: &T) {
    if !mailer.enabled() {
        log::debug!("Email disabled; skipping \"{subject}\" to {to}");
        return;
    }
    let Some(html) = templates::render(template) else {
        return;
    };
    if let Err(err) = mailer.send(to, subject, &html).await {
        log::warn!("Email send failed: {err}");
    }
}

/// Where to send updates about an appointment: the registered client's
/// address, else the guest email.
pub async fn recipient_for(pool: &SqlitePool, appointment: &AppointmentRow) -> Option<String> {
    if let Some(client_id) = &appointment.client_id {
        return sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = ?")
            .bind(client_id)
            .fetch_optional(pool)
            .await
            .unwrap_or_else(|err| {
                log::warn!("Recipient lookup failed: {err}");
                None
            });
    }
    appointment
        .guest_email
        .clone()
        .filter(|email| !email.trim().is_empty())
}

pub async fn professional_email(pool: &SqlitePool, professional_id: &str) -> Option<String> {
    sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = ?")
        .bind(professional_id)
        .fetch_optional(pool)
        .await
        .unwrap_or_else(|err| {
            log::warn!("Professional email lookup failed: {err}");
            None
        })
}
