//! Booking flow.
//!
//! A booking with no deposit becomes a `pending` appointment straight away.
//! Otherwise a booking intent holds the slot while the client pays; the
//! appointment row is only written once the gateway confirms the payment,
//! either through the client's redirect back (`/book/verify`) or the
//! gateway's webhook. Both paths settle the intent idempotently per
//! reference, and a payment whose slot was taken after its hold lapsed is
//! refunded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::{
    auth::{new_id, new_token, normalize_email, AuthUser},
    availability, catalog, clients,
    db::{self, timestamp},
    deposit::{deposit_for_profile, from_minor_units, to_minor_units},
    email::{self, BookingReceivedEmail, NewBookingEmail},
    error::AppError,
    models::{
        AppointmentRow, AppointmentStatus, BookingIntentRow, IntentStatus, PaymentStatus,
        ProfileRow, TransactionKind,
    },
    payments::{self, NewTransaction, PaymentRequest, WebhookEvent},
    profiles,
    realtime::{self, ChangeKind},
    state::AppState,
    templates::money,
};

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub service_id: String,
    pub start_time: String,
    pub notes: Option<String>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    Booked {
        appointment: AppointmentRow,
    },
    PaymentRequired {
        reference: String,
        authorization_url: String,
        deposit: f64,
        total: f64,
        currency: String,
    },
}

struct Contact {
    client_id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_contact(
    user: Option<&AuthUser>,
    request: &BookingRequest,
    deposit_due: bool,
) -> Result<Contact, AppError> {
    if let Some(user) = user.filter(|user| !user.is_professional()) {
        return Ok(Contact {
            client_id: Some(user.id.clone()),
            name: None,
            email: Some(user.email.clone()),
            phone: None,
        });
    }

    let name = non_empty(request.guest_name.clone());
    let email = non_empty(request.guest_email.clone()).map(|email| normalize_email(&email));
    let phone = non_empty(request.guest_phone.clone());

    let mut errors = Vec::new();
    if name.is_none() {
        errors.push("Your name is required.");
    }
    if email.is_none() && phone.is_none() {
        errors.push("An email or phone number is required.");
    }
    if deposit_due && email.is_none() {
        errors.push("An email is required to pay the deposit.");
    }
    if let Some(email) = &email {
        if !email.contains('@') {
            errors.push("The email address looks invalid.");
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors.join(" ")));
    }

    Ok(Contact {
        client_id: None,
        name,
        email,
        phone,
    })
}

struct NewAppointment<'a> {
    professional_id: &'a str,
    service_id: &'a str,
    contact: &'a Contact,
    start_time: &'a str,
    end_time: &'a str,
    notes: Option<&'a str>,
    deposit_required: f64,
    deposit_paid: f64,
    payment_status: PaymentStatus,
    total_amount: f64,
    payment_reference: Option<&'a str>,
}

async fn insert_appointment(
    conn: &mut SqliteConnection,
    appointment: NewAppointment<'_>,
) -> Result<AppointmentRow, AppError> {
    let id = new_id();
    let now = db::now();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, professional_id, service_id, client_id, guest_name, guest_email, guest_phone,
            start_time, end_time, status, notes, deposit_required, deposit_paid, payment_status,
            total_amount, payment_reference, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(appointment.professional_id)
    .bind(appointment.service_id)
    .bind(&appointment.contact.client_id)
    .bind(&appointment.contact.name)
    .bind(appointment.contact.client_id.is_none().then(|| appointment.contact.email.clone()).flatten())
    .bind(&appointment.contact.phone)
    .bind(appointment.start_time)
    .bind(appointment.end_time)
    .bind(AppointmentStatus::Pending)
    .bind(appointment.notes)
    .bind(appointment.deposit_required)
    .bind(appointment.deposit_paid)
    .bind(appointment.payment_status)
    .bind(appointment.total_amount)
    .bind(appointment.payment_reference)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let row = db::fetch_appointment(&mut *conn, &id).await?;
    clients::touch_relationship(conn, &row).await?;
    Ok(row)
}

pub async fn start_booking(
    state: &AppState,
    slug: &str,
    user: Option<&AuthUser>,
    request: BookingRequest,
    now: DateTime<Utc>,
) -> Result<BookingOutcome, AppError> {
    let profile = profiles::fetch_profile_by_slug(&state.db, slug).await?;
    let service = catalog::fetch_owned_service(&state.db, &profile.id, &request.service_id).await?;
    if !service.active {
        return Err(AppError::validation("This service is no longer offered."));
    }
    if user.map(|user| user.id == profile.id).unwrap_or(false) {
        return Err(AppError::validation("You cannot book your own services."));
    }

    let deposit = deposit_for_profile(&profile, service.price);
    let contact = resolve_contact(user, &request, deposit > 0.0)?;
    let start = db::parse_timestamp(&request.start_time)?;
    let end = availability::check_bookable(&profile, &service, start, now)?;
    let (start, end) = (timestamp(start), timestamp(end));
    let holds_since = availability::holds_since(now);
    let notes = non_empty(request.notes.clone());

    // Each branch writes before checking the slot, so the transaction already
    // holds the write lock when it looks for overlaps.
    if deposit <= 0.0 {
        let mut tx = state.db.begin().await?;
        let appointment = insert_appointment(
            &mut tx,
            NewAppointment {
                professional_id: &profile.id,
                service_id: &service.id,
                contact: &contact,
                start_time: &start,
                end_time: &end,
                notes: notes.as_deref(),
                deposit_required: 0.0,
                deposit_paid: 0.0,
                payment_status: PaymentStatus::Unpaid,
                total_amount: service.price,
                payment_reference: None,
            },
        )
        .await?;
        availability::ensure_free(&mut tx, &profile.id, &start, &end, Some(holds_since.as_str()), &appointment.id)
            .await?;
        tx.commit().await?;
        announce_booking(state, &profile, &appointment).await;
        return Ok(BookingOutcome::Booked { appointment });
    }

    let reference = new_token("bg");
    let intent_id = new_id();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"INSERT INTO booking_intents
           (id, reference, professional_id, service_id, client_id, guest_name, guest_email, guest_phone,
            start_time, end_time, notes, deposit_amount, total_amount, currency, status, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&intent_id)
    .bind(&reference)
    .bind(&profile.id)
    .bind(&service.id)
    .bind(&contact.client_id)
    .bind(&contact.name)
    .bind(&contact.email)
    .bind(&contact.phone)
    .bind(&start)
    .bind(&end)
    .bind(&notes)
    .bind(deposit)
    .bind(service.price)
    .bind(&profile.currency)
    .bind(IntentStatus::Initialized)
    .bind(timestamp(now))
    .execute(&mut *tx)
    .await?;
    availability::ensure_free(&mut tx, &profile.id, &start, &end, Some(holds_since.as_str()), &intent_id).await?;
    tx.commit().await?;

    let payment = PaymentRequest {
        // resolve_contact guarantees an email when a deposit is due.
        email: contact.email.clone().unwrap_or_default(),
        amount: to_minor_units(deposit),
        currency: profile.currency.clone(),
        reference: reference.clone(),
        callback_url: state.link(&format!("book/verify?reference={reference}")),
        subaccount: profile.paystack_subaccount.clone(),
    };

    let initialized = match state.gateway.initialize(&payment).await {
        Ok(initialized) => initialized,
        Err(err) => {
            mark_intent_failed(state, &intent_id).await;
            return Err(err);
        }
    };

    log::info!("Booking intent {reference} awaiting deposit of {deposit} {}", profile.currency);

    Ok(BookingOutcome::PaymentRequired {
        reference,
        authorization_url: initialized.authorization_url,
        deposit,
        total: service.price,
        currency: profile.currency,
    })
}

async fn mark_intent_failed(state: &AppState, intent_id: &str) {
    let result = sqlx::query("UPDATE booking_intents SET status = ? WHERE id = ? AND status = ?")
        .bind(IntentStatus::Failed)
        .bind(intent_id)
        .bind(IntentStatus::Initialized)
        .execute(&state.db)
        .await;
    if let Err(err) = result {
        log::warn!("Failed to mark booking intent {intent_id} failed: {err}");
    }
}

async fn fetch_intent(state: &AppState, reference: &str) -> Result<BookingIntentRow, AppError> {
    sqlx::query_as::<_, BookingIntentRow>(
        r#"SELECT id, reference, professional_id, service_id, client_id, guest_name, guest_email,
                  guest_phone, start_time, end_time, notes, deposit_amount, total_amount, currency,
                  status, appointment_id, created_at
           FROM booking_intents WHERE reference = ? LIMIT 1"#,
    )
    .bind(reference.trim())
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Booking"))
}

async fn existing_appointment(state: &AppState, intent: &BookingIntentRow) -> Result<AppointmentRow, AppError> {
    let appointment_id = intent
        .appointment_id
        .as_deref()
        .ok_or_else(|| AppError::Internal(format!("completed intent {} has no appointment", intent.reference)))?;
    db::fetch_appointment(&state.db, appointment_id).await
}

const NOT_PAID: &str = "This payment did not go through. Please book again.";
const SLOT_TAKEN: &str = "That time slot was taken before your payment cleared. Your deposit has been refunded.";

/// Verifies the payment for `reference` and turns its intent into an appointment.
pub async fn finalize(state: &AppState, reference: &str) -> Result<AppointmentRow, AppError> {
    settle(state, reference, false).await
}

/// `retry_failed` lets a gateway-signed success reopen an intent that an
/// earlier verification marked failed. The payment is verified again either way.
async fn settle(state: &AppState, reference: &str, retry_failed: bool) -> Result<AppointmentRow, AppError> {
    let intent = fetch_intent(state, reference).await?;
    match intent.status {
        IntentStatus::Completed => return existing_appointment(state, &intent).await,
        IntentStatus::Refunded => return Err(AppError::Conflict(SLOT_TAKEN.into())),
        IntentStatus::Failed if !retry_failed => return Err(AppError::validation(NOT_PAID)),
        IntentStatus::Failed | IntentStatus::Initialized => {}
    }

    let verified = state.gateway.verify(&intent.reference).await?;
    let expected = to_minor_units(intent.deposit_amount);
    if !verified.succeeded() && !verified.failed() {
        log::info!("Payment {} is still {}", intent.reference, verified.status);
        return Err(AppError::validation(
            "This payment has not completed yet. Please check again in a moment.",
        ));
    }
    if verified.failed() || verified.amount < expected {
        log::warn!(
            "Payment {} not accepted: status {}, amount {} of {}",
            intent.reference,
            verified.status,
            verified.amount,
            expected
        );
        mark_intent_failed(state, &intent.id).await;
        return Err(AppError::validation(NOT_PAID));
    }

    let paid = from_minor_units(verified.amount);
    let payment_status = if paid >= intent.total_amount {
        PaymentStatus::Paid
    } else {
        PaymentStatus::DepositPaid
    };
    let contact = Contact {
        client_id: intent.client_id.clone(),
        name: intent.guest_name.clone(),
        email: intent.guest_email.clone(),
        phone: intent.guest_phone.clone(),
    };

    let mut tx = state.db.begin().await?;
    let appointment = insert_appointment(
        &mut tx,
        NewAppointment {
            professional_id: &intent.professional_id,
            service_id: &intent.service_id,
            contact: &contact,
            start_time: &intent.start_time,
            end_time: &intent.end_time,
            notes: intent.notes.as_deref(),
            deposit_required: intent.deposit_amount,
            deposit_paid: paid,
            payment_status,
            total_amount: intent.total_amount,
            payment_reference: Some(&intent.reference),
        },
    )
    .await?;

    // Unpaid holds lapse, so another booking may have taken the slot meanwhile.
    let free = availability::ensure_free(
        &mut tx,
        &intent.professional_id,
        &intent.start_time,
        &intent.end_time,
        None,
        &appointment.id,
    )
    .await;
    match free {
        Ok(()) => {}
        Err(AppError::Conflict(_)) => {
            tx.rollback().await?;
            return refund_lost_slot(state, &intent, verified.amount).await;
        }
        Err(err) => return Err(err),
    }

    let claimed = sqlx::query(
        "UPDATE booking_intents SET status = ?, appointment_id = ? WHERE id = ? AND status IN (?, ?)",
    )
    .bind(IntentStatus::Completed)
    .bind(&appointment.id)
    .bind(&intent.id)
    .bind(IntentStatus::Initialized)
    .bind(IntentStatus::Failed)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        // The webhook and the redirect raced; the other one already settled it.
        tx.rollback().await?;
        let intent = fetch_intent(state, reference).await?;
        if intent.status == IntentStatus::Refunded {
            return Err(AppError::Conflict(SLOT_TAKEN.into()));
        }
        return existing_appointment(state, &intent).await;
    }

    payments::record_transaction(
        &mut tx,
        NewTransaction {
            appointment_id: &appointment.id,
            professional_id: &intent.professional_id,
            reference: &intent.reference,
            kind: TransactionKind::Deposit,
            amount: paid,
            currency: &intent.currency,
            status: &verified.status,
            gateway_response: serde_json::to_string(&verified).ok(),
        },
    )
    .await?;
    tx.commit().await?;

    if let Ok(profile) = profiles::fetch_profile(&state.db, &intent.professional_id).await {
        announce_booking(state, &profile, &appointment).await;
    }
    Ok(appointment)
}

/// Gives the money back for a paid intent whose slot is gone. The intent is
/// claimed first so a redelivered webhook cannot refund twice.
async fn refund_lost_slot(state: &AppState, intent: &BookingIntentRow, amount: i64) -> Result<AppointmentRow, AppError> {
    let claimed = sqlx::query("UPDATE booking_intents SET status = ? WHERE id = ? AND status IN (?, ?)")
        .bind(IntentStatus::Refunded)
        .bind(&intent.id)
        .bind(IntentStatus::Initialized)
        .bind(IntentStatus::Failed)
        .execute(&state.db)
        .await?;
    if claimed.rows_affected() == 0 {
        return Err(AppError::Conflict(SLOT_TAKEN.into()));
    }

    if let Err(err) = state.gateway.refund(&intent.reference, amount).await {
        log::error!("Refund of {} for a taken slot failed: {err}", intent.reference);
        let released = sqlx::query("UPDATE booking_intents SET status = ? WHERE id = ? AND status = ?")
            .bind(intent.status)
            .bind(&intent.id)
            .bind(IntentStatus::Refunded)
            .execute(&state.db)
            .await;
        if let Err(release_err) = released {
            log::error!("Booking intent {} stays marked refunded: {release_err}", intent.reference);
        }
        return Err(err);
    }

    log::warn!(
        "Refunded payment {} because {} was booked while it was pending",
        intent.reference,
        intent.start_time
    );
    Err(AppError::Conflict(SLOT_TAKEN.into()))
}

/// Handles a gateway webhook. Unknown events and references are ignored.
pub async fn handle_webhook(state: &AppState, body: &[u8], signature: &str) -> Result<(), AppError> {
    if !state.gateway.verify_signature(body, signature) {
        return Err(AppError::Unauthorized);
    }
    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|err| AppError::validation(format!("Malformed webhook payload: {err}")))?;
    if event.event != "charge.success" {
        log::debug!("Ignoring webhook event {}", event.event);
        return Ok(());
    }
    let Some(reference) = event.data.get("reference").and_then(|value| value.as_str()) else {
        return Err(AppError::validation("Webhook payload has no reference."));
    };
    match settle(state, reference, true).await {
        Ok(appointment) => {
            log::info!("Webhook confirmed payment {reference} for appointment {}", appointment.id);
            Ok(())
        }
        Err(AppError::NotFound(_)) => {
            log::debug!("Webhook for unknown reference {reference}");
            Ok(())
        }
        // Nothing left to do for this reference; redelivery would not change it.
        Err(AppError::Conflict(message) | AppError::Validation(message)) => {
            log::info!("Webhook for {reference} not booked: {message}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn announce_booking(state: &AppState, profile: &ProfileRow, appointment: &AppointmentRow) {
    db::log_activity(
        &state.db,
        "appointment_created",
        &format!("New appointment requested by {}.", appointment.contact_name()),
        appointment.client_id.as_deref(),
        Some(&appointment.id),
    )
    .await;

    realtime::publish(&state.events, ChangeKind::Insert, appointment.clone());

    let service_name = appointment.service_name.clone().unwrap_or_default();
    if let Some(to) = email::recipient_for(&state.db, appointment).await {
        let message = BookingReceivedEmail {
            client_name: appointment.contact_name(),
            business_name: profile.business_name.clone(),
            service_name: service_name.clone(),
            start_time: appointment.start_time.clone(),
            deposit: money(appointment.deposit_paid, &profile.currency),
            has_deposit: appointment.deposit_paid > 0.0,
        };
        email::send_template(&state.mailer, &to, "We received your booking", &message).await;
    }
    if let Some(to) = email::professional_email(&state.db, &profile.id).await {
        let message = NewBookingEmail {
            professional_name: profile.full_name.clone(),
            client_name: appointment.contact_name(),
            service_name,
            start_time: appointment.start_time.clone(),
            dashboard_url: state.link("pro/appointments"),
        };
        email::send_template(&state.mailer, &to, "New booking request", &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        availability::INTENT_HOLD_MINUTES,
        db::testing,
        lifecycle::{transition, StatusAction},
        models::{DepositType, ROLE_CLIENT, ROLE_PROFESSIONAL},
        payments::{list_transactions, record_full_payment, refund_deposit, sign},
        profiles::{update_profile, ProfileUpdate},
        state,
    };
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, hour, 0, 0).unwrap()
    }

    fn guest_request(service_id: &str, hour: u32) -> BookingRequest {
        BookingRequest {
            service_id: service_id.to_string(),
            start_time: timestamp(at(hour)),
            notes: Some("Bring extensions".into()),
            guest_name: Some("Bisi".into()),
            guest_email: Some("Bisi@Example.com".into()),
            guest_phone: None,
        }
    }

    async fn setup(deposit: Option<f64>) -> (AppState, std::sync::Arc<crate::payments::fake::FakeGateway>, String, String) {
        let (state, gateway) = state::testing::state().await;
        let pro = testing::professional(&state.db, "pro@example.com").await;
        testing::open_every_day(&state.db, &pro).await;
        if let Some(percentage) = deposit {
            update_profile(
                &state.db,
                &pro,
                ProfileUpdate {
                    deposit_type: Some(DepositType::Percentage),
                    deposit_value: Some(percentage),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let service = testing::service(&state.db, &pro, 20000.0).await;
        (state, gateway, pro, service.id)
    }

    #[tokio::test]
    async fn booking_without_deposit_is_immediate() {
        let (state, _, _, service_id) = setup(None).await;
        let mut events = state.events.subscribe();

        let outcome = start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
            .await
            .unwrap();
        let BookingOutcome::Booked { appointment } = outcome else {
            panic!("expected an immediate booking");
        };
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.payment_status, PaymentStatus::Unpaid);
        assert_eq!(appointment.guest_email.as_deref(), Some("bisi@example.com"));
        assert_eq!(appointment.end_time, "2026-03-09T11:00:00Z");

        let event = events.recv().await.unwrap();
        assert_eq!(event.appointment_id, appointment.id);

        // Same slot again is taken, and the rejected insert is rolled back.
        let again = start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1)).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert_eq!(appointment_count(&state).await, 1);
    }

    fn payment_reference(outcome: BookingOutcome) -> String {
        match outcome {
            BookingOutcome::PaymentRequired { reference, .. } => reference,
            BookingOutcome::Booked { .. } => panic!("expected a payment step"),
        }
    }

    async fn appointment_count(state: &AppState) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    async fn intent_status(state: &AppState, reference: &str) -> String {
        sqlx::query_scalar::<_, String>("SELECT status FROM booking_intents WHERE reference = ?")
            .bind(reference)
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    fn signed(event: &str, reference: &str) -> (String, String) {
        let body = serde_json::json!({ "event": event, "data": { "reference": reference } }).to_string();
        let signature = sign("test-secret", body.as_bytes());
        (body, signature)
    }

    #[tokio::test]
    async fn deposit_flow_inserts_after_verification() {
        let (state, gateway, pro, service_id) = setup(Some(30.0)).await;

        let outcome = start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
            .await
            .unwrap();
        let BookingOutcome::PaymentRequired { reference, deposit, authorization_url, .. } = outcome else {
            panic!("expected a payment step");
        };
        assert_eq!(deposit, 6000.0);
        assert!(authorization_url.ends_with(&reference));
        {
            let initialized = gateway.initialized.lock().unwrap();
            assert_eq!(initialized[0].amount, 600_000);
            assert!(initialized[0].callback_url.contains(&reference));
        }

        // The unpaid intent holds the slot.
        let clash = start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1)).await;
        assert!(matches!(clash, Err(AppError::Conflict(_))));

        let appointment = finalize(&state, &reference).await.unwrap();
        assert_eq!(appointment.payment_status, PaymentStatus::DepositPaid);
        assert_eq!(appointment.deposit_paid, 6000.0);
        assert_eq!(appointment.payment_reference.as_deref(), Some(reference.as_str()));

        // Verifying twice returns the same appointment.
        let again = finalize(&state, &reference).await.unwrap();
        assert_eq!(again.id, appointment.id);

        let ledger = list_transactions(&state.db, &pro, None).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, TransactionKind::Deposit);
        assert_eq!(ledger[0].service_name.as_deref(), Some("Knotless Braids"));
    }

    #[tokio::test]
    async fn declined_payment_fails_the_intent() {
        let (state, gateway, _, service_id) = setup(Some(30.0)).await;
        let BookingOutcome::PaymentRequired { reference, .. } =
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap()
        else {
            panic!("expected a payment step");
        };
        gateway.declined.lock().unwrap().push(reference.clone());

        assert!(matches!(finalize(&state, &reference).await, Err(AppError::Validation(_))));
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM appointments")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // The slot is free again.
        assert!(start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn webhook_requires_a_valid_signature() {
        let (state, _, _, service_id) = setup(Some(50.0)).await;
        let BookingOutcome::PaymentRequired { reference, .. } =
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 12), at(1))
                .await
                .unwrap()
        else {
            panic!("expected a payment step");
        };

        let body = serde_json::json!({ "event": "charge.success", "data": { "reference": reference } }).to_string();
        let forged = handle_webhook(&state, body.as_bytes(), "deadbeef").await;
        assert!(matches!(forged, Err(AppError::Unauthorized)));

        let signature = sign("test-secret", body.as_bytes());
        handle_webhook(&state, body.as_bytes(), &signature).await.unwrap();
        let status = sqlx::query_scalar::<_, String>("SELECT payment_status FROM appointments")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(status, "deposit_paid");

        let unknown = serde_json::json!({ "event": "charge.success", "data": { "reference": "bg_missing" } }).to_string();
        let signature = sign("test-secret", unknown.as_bytes());
        assert!(handle_webhook(&state, unknown.as_bytes(), &signature).await.is_ok());
    }

    #[tokio::test]
    async fn refunds_and_balances_are_recorded() {
        let (state, gateway, pro, service_id) = setup(Some(25.0)).await;
        let BookingOutcome::PaymentRequired { reference, .. } =
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 14), at(1))
                .await
                .unwrap()
        else {
            panic!("expected a payment step");
        };
        let appointment = finalize(&state, &reference).await.unwrap();

        let paid = record_full_payment(&state.db, &pro, &appointment.id).await.unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);

        let refunded = refund_deposit(&state.db, state.gateway.as_ref(), &pro, &appointment.id)
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(gateway.refunds.lock().unwrap()[0], (reference.clone(), 500_000));

        let twice = refund_deposit(&state.db, state.gateway.as_ref(), &pro, &appointment.id).await;
        assert!(matches!(twice, Err(AppError::Conflict(_))));

        let ledger = list_transactions(&state.db, &pro, Some(&appointment.id)).await.unwrap();
        let kinds: Vec<_> = ledger.iter().map(|t| t.kind).collect();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&TransactionKind::Refund));
        assert!(kinds.contains(&TransactionKind::FullPayment));
        let balance = ledger.iter().find(|t| t.kind == TransactionKind::FullPayment).unwrap();
        assert_eq!(balance.amount, 15000.0);
    }

    #[tokio::test]
    async fn registered_clients_book_under_their_account() {
        let (state, _, pro, service_id) = setup(None).await;
        let client_id = testing::client(&state.db, "amaka@example.com", "Amaka").await;
        let client = AuthUser {
            id: client_id.clone(),
            email: "amaka@example.com".into(),
            display_name: "Amaka".into(),
            role: ROLE_CLIENT.into(),
        };
        let mut request = guest_request(&service_id, 9);
        request.guest_name = None;
        request.guest_email = None;

        let BookingOutcome::Booked { appointment } =
            start_booking(&state, "ada-styles", Some(&client), request, at(1)).await.unwrap()
        else {
            panic!("expected an immediate booking");
        };
        assert_eq!(appointment.client_id.as_deref(), Some(client_id.as_str()));
        assert_eq!(appointment.client_name.as_deref(), Some("Amaka"));
        assert!(appointment.guest_email.is_none());

        let relationships = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM client_profiles WHERE professional_id = ? AND client_id = ?",
        )
        .bind(&pro)
        .bind(&client_id)
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(relationships, 1);

        let pro_user = AuthUser {
            id: pro,
            email: String::new(),
            display_name: "Ada".into(),
            role: ROLE_PROFESSIONAL.into(),
        };
        transition(&state.db, &pro_user, &appointment.id, StatusAction::Accept).await.unwrap();
    }

    #[tokio::test]
    async fn guests_must_leave_contact_details() {
        let (state, _, _, service_id) = setup(Some(10.0)).await;
        let mut request = guest_request(&service_id, 10);
        request.guest_email = None;
        request.guest_phone = Some("+2348000000000".into());

        let err = start_booking(&state, "ada-styles", None, request, at(1)).await.unwrap_err();
        assert!(err.to_string().contains("email is required to pay"));
    }

    #[tokio::test]
    async fn payment_for_a_slot_taken_after_the_hold_lapsed_is_refunded() {
        let (state, gateway, _, service_id) = setup(Some(30.0)).await;
        let first = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap(),
        );

        // The first client's hold runs out and someone else books the slot.
        let mut request = guest_request(&service_id, 10);
        request.guest_name = Some("Tolu".into());
        request.guest_email = Some("tolu@example.com".into());
        let later = at(1) + chrono::Duration::minutes(INTENT_HOLD_MINUTES + 1);
        let second = payment_reference(start_booking(&state, "ada-styles", None, request, later).await.unwrap());
        let booked = finalize(&state, &second).await.unwrap();
        assert_eq!(booked.guest_name.as_deref(), Some("Tolu"));

        let late = finalize(&state, &first).await;
        assert!(matches!(late, Err(AppError::Conflict(_))));
        assert_eq!(appointment_count(&state).await, 1);
        assert_eq!(intent_status(&state, &first).await, "refunded");
        assert_eq!(gateway.refunds.lock().unwrap().as_slice(), &[(first.clone(), 600_000)]);

        // A redelivered webhook neither books nor refunds again.
        let (body, signature) = signed("charge.success", &first);
        handle_webhook(&state, body.as_bytes(), &signature).await.unwrap();
        assert_eq!(appointment_count(&state).await, 1);
        assert_eq!(gateway.refunds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unfinished_payments_keep_the_intent_open() {
        let (state, gateway, _, service_id) = setup(Some(30.0)).await;
        let reference = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap(),
        );
        gateway.abandoned.lock().unwrap().push(reference.clone());

        assert!(matches!(finalize(&state, &reference).await, Err(AppError::Validation(_))));
        assert_eq!(intent_status(&state, &reference).await, "initialized");
        assert_eq!(appointment_count(&state).await, 0);

        gateway.abandoned.lock().unwrap().clear();
        let appointment = finalize(&state, &reference).await.unwrap();
        assert_eq!(appointment.payment_status, PaymentStatus::DepositPaid);
    }

    #[tokio::test]
    async fn signed_success_books_an_intent_that_failed_earlier() {
        let (state, gateway, _, service_id) = setup(Some(30.0)).await;
        let reference = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap(),
        );
        gateway.declined.lock().unwrap().push(reference.clone());
        assert!(finalize(&state, &reference).await.is_err());
        assert_eq!(intent_status(&state, &reference).await, "failed");

        // The client retried on the checkout page and the charge went through.
        gateway.declined.lock().unwrap().clear();
        let (body, signature) = signed("charge.success", &reference);
        handle_webhook(&state, body.as_bytes(), &signature).await.unwrap();

        assert_eq!(appointment_count(&state).await, 1);
        assert_eq!(intent_status(&state, &reference).await, "completed");
        let appointment = finalize(&state, &reference).await.unwrap();
        assert_eq!(appointment.payment_reference.as_deref(), Some(reference.as_str()));
    }

    #[tokio::test]
    async fn underpaid_deposits_are_rejected() {
        let (state, gateway, _, service_id) = setup(Some(30.0)).await;
        let reference = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap(),
        );
        *gateway.amount_override.lock().unwrap() = Some(100_000);

        assert!(matches!(finalize(&state, &reference).await, Err(AppError::Validation(_))));
        assert_eq!(intent_status(&state, &reference).await, "failed");
        assert_eq!(appointment_count(&state).await, 0);
    }

    #[tokio::test]
    async fn other_webhook_events_are_ignored() {
        let (state, _, _, service_id) = setup(Some(30.0)).await;
        let reference = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 10), at(1))
                .await
                .unwrap(),
        );

        let (body, signature) = signed("charge.dispute.create", &reference);
        handle_webhook(&state, body.as_bytes(), &signature).await.unwrap();

        assert_eq!(appointment_count(&state).await, 0);
        assert_eq!(intent_status(&state, &reference).await, "initialized");
    }

    #[tokio::test]
    async fn failed_gateway_refund_releases_the_claim() {
        let (state, gateway, pro, service_id) = setup(Some(25.0)).await;
        let reference = payment_reference(
            start_booking(&state, "ada-styles", None, guest_request(&service_id, 14), at(1))
                .await
                .unwrap(),
        );
        let appointment = finalize(&state, &reference).await.unwrap();

        *gateway.refunds_fail.lock().unwrap() = true;
        let failed = refund_deposit(&state.db, state.gateway.as_ref(), &pro, &appointment.id).await;
        assert!(matches!(failed, Err(AppError::Gateway(_))));
        let row = db::fetch_appointment(&state.db, &appointment.id).await.unwrap();
        assert_eq!(row.payment_status, PaymentStatus::DepositPaid);
        assert_eq!(list_transactions(&state.db, &pro, Some(&appointment.id)).await.unwrap().len(), 1);

        *gateway.refunds_fail.lock().unwrap() = false;
        let refunded = refund_deposit(&state.db, state.gateway.as_ref(), &pro, &appointment.id)
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(gateway.refunds.lock().unwrap().len(), 1);
    }
}
