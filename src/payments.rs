use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha512;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::{new_id, new_token},
    config::PaystackConfig,
    db,
    deposit::{from_minor_units, round2, to_minor_units},
    error::AppError,
    models::{AppointmentRow, PaymentStatus, PaymentTransactionRow, TransactionKind},
};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAccount {
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubaccountRequest {
    pub business_name: String,
    pub bank_code: String,
    pub account_number: String,
    pub percentage_charge: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subaccount {
    pub subaccount_code: String,
    #[serde(default)]
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    pub email: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedPayment {
    pub status: String,
    pub reference: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

impl VerifiedPayment {
    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }

    /// Final failures. `abandoned`, `ongoing`, `pending`, `processing` and
    /// `queued` payments may still complete.
    pub fn failed(&self) -> bool {
        matches!(self.status.as_str(), "failed" | "reversed")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn list_banks(&self, country: &str) -> Result<Vec<Bank>, AppError>;
    async fn resolve_account(&self, account_number: &str, bank_code: &str) -> Result<ResolvedAccount, AppError>;
    async fn create_subaccount(&self, request: &SubaccountRequest) -> Result<Subaccount, AppError>;
    async fn initialize(&self, request: &PaymentRequest) -> Result<InitializedPayment, AppError>;
    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, AppError>;
    async fn refund(&self, reference: &str, amount: i64) -> Result<RefundResult, AppError>;
    /// Whether `signature` is the HMAC-SHA512 of `body` under the secret key.
    fn verify_signature(&self, body: &[u8], signature: &str) -> bool;
}

pub struct PaystackClient {
    config: PaystackConfig,
    http: reqwest::Client,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
        let http_status = response.status();
        let body = response.text().await?;
        parse_envelope(&body).map_err(|err| {
            log::warn!("Paystack call failed with HTTP {http_status}: {err}");
            err
        })
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, AppError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|err| AppError::Gateway(format!("unexpected response: {err}")))?;
    if !envelope.status {
        return Err(AppError::Gateway(envelope.message));
    }
    envelope
        .data
        .ok_or_else(|| AppError::Gateway(format!("no data in response: {}", envelope.message)))
}

#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).expect("HMAC key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn signature_matches(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn list_banks(&self, country: &str) -> Result<Vec<Bank>, AppError> {
        let response = self
            .http
            .get(self.url("bank"))
            .bearer_auth(&self.config.secret_key)
            .query(&[("country", country)])
            .send()
            .await?;
        Self::read(response).await
    }

    async fn resolve_account(&self, account_number: &str, bank_code: &str) -> Result<ResolvedAccount, AppError> {
        let response = self
            .http
            .get(self.url("bank/resolve"))
            .bearer_auth(&self.config.secret_key)
            .query(&[("account_number", account_number), ("bank_code", bank_code)])
            .send()
            .await?;
        Self::read(response).await
    }

    async fn create_subaccount(&self, request: &SubaccountRequest) -> Result<Subaccount, AppError> {
        let response = self
            .http
            .post(self.url("subaccount"))
            .bearer_auth(&self.config.secret_key)
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn initialize(&self, request: &PaymentRequest) -> Result<InitializedPayment, AppError> {
        let response = self
            .http
            .post(self.url("transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, AppError> {
        let response = self
            .http
            .get(self.url(&format!("transaction/verify/{reference}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn refund(&self, reference: &str, amount: i64) -> Result<RefundResult, AppError> {
        let response = self
            .http
            .post(self.url("refund"))
            .bearer_auth(&self.config.secret_key)
            .json(&serde_json::json!({ "transaction": reference, "amount": amount }))
            .send()
            .await?;
        Self::read(response).await
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        signature_matches(&self.config.secret_key, body, signature)
    }
}

pub struct NewTransaction<'a> {
    pub appointment_id: &'a str,
    pub professional_id: &'a str,
    pub reference: &'a str,
    pub kind: TransactionKind,
    pub amount: f64,
    pub currency: &'a str,
    pub status: &'a str,
    pub gateway_response: Option<String>,
}

/// Appends to the ledger. Rows are never updated or deleted.
pub async fn record_transaction(
    conn: &mut SqliteConnection,
    transaction: NewTransaction<'_>,
) -> Result<String, AppError> {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO payment_transactions
           (id, appointment_id, professional_id, reference, kind, amount, currency, status, gateway_response, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(transaction.appointment_id)
    .bind(transaction.professional_id)
    .bind(transaction.reference)
    .bind(transaction.kind)
    .bind(round2(transaction.amount))
    .bind(transaction.currency)
    .bind(transaction.status)
    .bind(transaction.gateway_response)
    .bind(db::now())
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn list_transactions(
    pool: &SqlitePool,
    professional_id: &str,
    appointment_id: Option<&str>,
) -> Result<Vec<PaymentTransactionRow>, AppError> {
    let rows = sqlx::query_as::<_, PaymentTransactionRow>(
        r#"SELECT t.id, t.appointment_id, t.professional_id, s.name as service_name, t.reference,
                  t.kind, t.amount, t.currency, t.status, t.created_at
           FROM payment_transactions t
           LEFT JOIN appointments a ON a.id = t.appointment_id
           LEFT JOIN services s ON s.id = a.service_id
           WHERE t.professional_id = ? AND (? IS NULL OR t.appointment_id = ?)
           ORDER BY t.created_at DESC, t.rowid DESC"#,
    )
    .bind(professional_id)
    .bind(appointment_id)
    .bind(appointment_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn currency_for(pool: &SqlitePool, professional_id: &str) -> Result<String, AppError> {
    let currency = sqlx::query_scalar::<_, String>("SELECT currency FROM profiles WHERE id = ?")
        .bind(professional_id)
        .fetch_optional(pool)
        .await?;
    Ok(currency.unwrap_or_else(|| "NGN".to_string()))
}

fn owned(appointment: &AppointmentRow, professional_id: &str) -> Result<(), AppError> {
    if appointment.professional_id != professional_id {
        return Err(AppError::NotFound("Appointment"));
    }
    Ok(())
}

/// Refunds the paid deposit through the gateway and records the refund.
///
/// The row is claimed as refunded before the gateway is called, so only one
/// concurrent request reaches the gateway. A failed gateway call releases it.
pub async fn refund_deposit(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    professional_id: &str,
    appointment_id: &str,
) -> Result<AppointmentRow, AppError> {
    let appointment = db::fetch_appointment(pool, appointment_id).await?;
    owned(&appointment, professional_id)?;
    if appointment.payment_status == PaymentStatus::Refunded {
        return Err(AppError::Conflict("This deposit was already refunded.".into()));
    }
    let reference = match (&appointment.payment_reference, appointment.deposit_paid > 0.0) {
        (Some(reference), true) => reference.clone(),
        _ => return Err(AppError::validation("There is no paid deposit to refund.")),
    };
    let currency = currency_for(pool, professional_id).await?;

    let claimed = sqlx::query(
        "UPDATE appointments SET payment_status = ?, updated_at = ? WHERE id = ? AND payment_status = ?",
    )
    .bind(PaymentStatus::Refunded)
    .bind(db::now())
    .bind(appointment_id)
    .bind(appointment.payment_status)
    .execute(pool)
    .await?;
    if claimed.rows_affected() == 0 {
        return Err(AppError::Conflict("Payment status changed. Refresh and try again.".into()));
    }

    let result = match gateway.refund(&reference, to_minor_units(appointment.deposit_paid)).await {
        Ok(result) => result,
        Err(err) => {
            let released = sqlx::query(
                "UPDATE appointments SET payment_status = ?, updated_at = ? WHERE id = ? AND payment_status = ?",
            )
            .bind(appointment.payment_status)
            .bind(db::now())
            .bind(appointment_id)
            .bind(PaymentStatus::Refunded)
            .execute(pool)
            .await;
            if let Err(release_err) = released {
                log::error!("Refund of {reference} failed and appointment {appointment_id} stays marked refunded: {release_err}");
            }
            return Err(err);
        }
    };

    let mut conn = pool.acquire().await?;
    record_transaction(
        &mut conn,
        NewTransaction {
            appointment_id,
            professional_id,
            reference: &reference,
            kind: TransactionKind::Refund,
            amount: result.amount.map(from_minor_units).unwrap_or(appointment.deposit_paid),
            currency: &currency,
            status: result.status.as_deref().unwrap_or("pending"),
            gateway_response: None,
        },
    )
    .await?;
    db::fetch_appointment(&mut *conn, appointment_id).await
}

/// Records the outstanding balance as paid outside the gateway (cash, transfer).
pub async fn record_full_payment(
    pool: &SqlitePool,
    professional_id: &str,
    appointment_id: &str,
) -> Result<AppointmentRow, AppError> {
    let appointment = db::fetch_appointment(pool, appointment_id).await?;
    owned(&appointment, professional_id)?;
    if matches!(appointment.payment_status, PaymentStatus::Paid | PaymentStatus::Refunded) {
        return Err(AppError::Conflict(format!(
            "Payment is already {}.",
            appointment.payment_status
        )));
    }
    let balance = round2(appointment.total_amount - appointment.deposit_paid).max(0.0);
    let currency = currency_for(pool, professional_id).await?;
    let reference = new_token("manual");

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE appointments SET payment_status = ?, updated_at = ? WHERE id = ? AND payment_status = ?",
    )
    .bind(PaymentStatus::Paid)
    .bind(db::now())
    .bind(appointment_id)
    .bind(appointment.payment_status)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict("Payment status changed. Refresh and try again.".into()));
    }
    record_transaction(
        &mut tx,
        NewTransaction {
            appointment_id,
            professional_id,
            reference: &reference,
            kind: TransactionKind::FullPayment,
            amount: balance,
            currency: &currency,
            status: "success",
            gateway_response: None,
        },
    )
    .await?;
    let row = db::fetch_appointment(&mut *tx, appointment_id).await?;
    tx.commit().await?;
    Ok(row)
}
