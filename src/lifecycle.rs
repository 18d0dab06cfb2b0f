//! ```text
//! pending --accept--> confirmed --complete--> completed
//!    |                    |-------cancel----> cancelled
//!    |--decline--> cancelled  `---no_show---> no_show
//! ```
//!
//! Transitions are compare-and-set on the stored status, so two writers
//! racing on the same appointment cannot both win.

use serde::Deserialize;
use strum_macros::Display;

use crate::{
    auth::AuthUser,
    clients, db,
    email::{self, StatusChangedEmail},
    error::AppError,
    models::{AppointmentRow, AppointmentStatus},
    realtime::{self, ChangeKind},
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusAction {
    Accept,
    Decline,
    Cancel,
    Complete,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Professional,
    Client,
}

pub fn next_status(
    current: AppointmentStatus,
    action: StatusAction,
    actor: Actor,
) -> Result<AppointmentStatus, AppError> {
    use AppointmentStatus::*;

    let next = match (action, actor, current) {
        (StatusAction::Accept, Actor::Professional, Pending) => Confirmed,
        (StatusAction::Decline, Actor::Professional, Pending) => Cancelled,
        (StatusAction::Cancel, _, Confirmed) => Cancelled,
        (StatusAction::Complete, Actor::Professional, Confirmed) => Completed,
        (StatusAction::NoShow, Actor::Professional, Confirmed) => NoShow,
        (StatusAction::Accept | StatusAction::Decline | StatusAction::Complete | StatusAction::NoShow, Actor::Client, _) => {
            return Err(AppError::Forbidden(format!("Clients cannot {action} appointments.")));
        }
        _ => {
            return Err(AppError::Conflict(format!(
                "Cannot {action} an appointment that is {current}."
            )));
        }
    };
    Ok(next)
}

fn actor_for(user: &AuthUser, appointment: &AppointmentRow) -> Result<Actor, AppError> {
    if appointment.professional_id == user.id {
        Ok(Actor::Professional)
    } else if appointment.client_id.as_deref() == Some(user.id.as_str()) {
        Ok(Actor::Client)
    } else {
        // Same answer as a missing row, so ids cannot be enumerated.
        Err(AppError::NotFound("Appointment"))
    }
}

/// Applies `action` for `user` and returns the updated row.
pub async fn transition(
    pool: &sqlx::SqlitePool,
    user: &AuthUser,
    appointment_id: &str,
    action: StatusAction,
) -> Result<AppointmentRow, AppError> {
    let current = db::fetch_appointment(pool, appointment_id).await?;
    let actor = actor_for(user, &current)?;
    let next = next_status(current.status, action, actor)?;

    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        "UPDATE appointments SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(next)
    .bind(db::now())
    .bind(appointment_id)
    .bind(current.status)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "This appointment was changed by someone else. Refresh and try again.".into(),
        ));
    }

    if next == AppointmentStatus::Completed {
        clients::record_completed(&mut *tx, &current).await?;
    }

    let updated = db::fetch_appointment(&mut *tx, appointment_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Transition plus the side effects every status change carries: activity
/// line, realtime event and client email.
pub async fn apply(
    state: &AppState,
    user: &AuthUser,
    appointment_id: &str,
    action: StatusAction,
) -> Result<AppointmentRow, AppError> {
    let updated = transition(&state.db, user, appointment_id, action).await?;

    db::log_activity(
        &state.db,
        "appointment_status",
        &format!("{} set appointment {} to {}.", user.display_name, appointment_id, updated.status),
        Some(&user.id),
        Some(appointment_id),
    )
    .await;

    realtime::publish(&state.events, ChangeKind::Update, updated.clone());

    if let Some(to) = email::recipient_for(&state.db, &updated).await {
        let message = StatusChangedEmail {
            client_name: updated.contact_name(),
            service_name: updated.service_name.clone().unwrap_or_default(),
            start_time: updated.start_time.clone(),
            status: updated.status.to_string().replace('_', " "),
        };
        email::send_template(&state.mailer, &to, "Your appointment was updated", &message).await;
    }

    Ok(updated)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<AppointmentStatus>,
}

/// Appointments where `user` is the professional or the registered client,
/// ordered by start time. `from`/`to` bound `start_time` (inclusive, exclusive).
pub async fn list_appointments(
    pool: &sqlx::SqlitePool,
    user: &AuthUser,
    query: &AppointmentQuery,
) -> Result<Vec<AppointmentRow>, AppError> {
    let from = query.from.as_deref().map(db::parse_timestamp).transpose()?.map(db::timestamp);
    let to = query.to.as_deref().map(db::parse_timestamp).transpose()?.map(db::timestamp);
    let owner_column = if user.is_professional() {
        "a.professional_id"
    } else {
        "a.client_id"
    };

    let sql = format!(
        "{} WHERE {owner_column} = ? AND (? IS NULL OR a.start_time >= ?) AND (? IS NULL OR a.start_time < ?) \
         AND (? IS NULL OR a.status = ?) ORDER BY a.start_time ASC",
        db::APPOINTMENT_SELECT
    );
    let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(&user.id)
        .bind(&from)
        .bind(&from)
        .bind(&to)
        .bind(&to)
        .bind(query.status)
        .bind(query.status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Removes a finished appointment from the professional's book. Appointments
/// with ledger entries are kept.
pub async fn delete_appointment(
    state: &AppState,
    user: &AuthUser,
    appointment_id: &str,
) -> Result<(), AppError> {
    let current = db::fetch_appointment(&state.db, appointment_id).await?;
    if current.professional_id != user.id {
        return Err(AppError::NotFound("Appointment"));
    }
    if !current.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Only finished appointments can be deleted; this one is {}.",
            current.status
        )));
    }
    let payments = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM payment_transactions WHERE appointment_id = ?",
    )
    .bind(appointment_id)
    .fetch_one(&state.db)
    .await?;
    if payments > 0 {
        return Err(AppError::Conflict(
            "Appointments with recorded payments cannot be deleted.".into(),
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE activities SET appointment_id = NULL WHERE appointment_id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE booking_intents SET appointment_id = NULL WHERE appointment_id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    db::log_activity(
        &state.db,
        "appointment_deleted",
        &format!("{} deleted an appointment with {}.", user.display_name, current.contact_name()),
        Some(&user.id),
        None,
    )
    .await;
    realtime::publish(&state.events, ChangeKind::Delete, current);
    Ok(())
}
