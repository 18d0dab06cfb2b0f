use std::{fs, path::Path};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Sqlite, SqlitePool};

use crate::{
    auth::new_id,
    error::AppError,
    models::{ActivityRow, AppointmentRow},
};

pub const APPOINTMENT_SELECT: &str = r#"SELECT a.id, a.professional_id, a.service_id, s.name as service_name,
          a.client_id, u.display_name as client_name,
          a.guest_name, a.guest_email, a.guest_phone,
          a.start_time, a.end_time, a.status, a.notes,
          a.deposit_required, a.deposit_paid, a.payment_status, a.total_amount,
          a.payment_reference, a.created_at, a.updated_at
   FROM appointments a
   LEFT JOIN services s ON a.service_id = s.id
   LEFT JOIN users u ON a.client_id = u.id"#;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Canonical stored form: UTC, second precision, `Z` suffix.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| AppError::validation(format!("Invalid timestamp: {value}")))
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(now())
    .bind(user_id)
    .bind(appointment_id)
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Failed to record activity {kind}: {err}");
    }
}

/// Newest first: lines filed under the professional plus lines about their appointments.
pub async fn recent_activity(
    pool: &SqlitePool,
    professional_id: &str,
    limit: i64,
) -> Result<Vec<ActivityRow>, AppError> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"SELECT kind, message, created_at
           FROM activities
           WHERE user_id = ?
              OR appointment_id IN (SELECT id FROM appointments WHERE professional_id = ?)
           ORDER BY created_at DESC, rowid DESC
           LIMIT ?"#,
    )
    .bind(professional_id)
    .bind(professional_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn fetch_appointment<'e, E>(executor: E, appointment_id: &str) -> Result<AppointmentRow, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let query = format!("{APPOINTMENT_SELECT} WHERE a.id = ? LIMIT 1");
    sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(appointment_id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
}

#[cfg(test)]
pub mod testing {
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

    use crate::{
        auth::{create_user, NewUser},
        catalog::{create_service, ServiceInput},
        models::{ServiceRow, ROLE_CLIENT, ROLE_PROFESSIONAL},
        profiles::{create_profile, update_profile, ProfileUpdate},
    };

    pub async fn pool() -> SqlitePool {
        // One connection: every new `sqlite::memory:` connection is a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        super::run_migrations(&pool).await.unwrap();
        pool
    }

    pub async fn professional(pool: &SqlitePool, email: &str) -> String {
        let user = create_user(
            pool,
            NewUser {
                email: email.to_string(),
                display_name: "Ada Styles".to_string(),
                password: "secret-pass".to_string(),
                role: ROLE_PROFESSIONAL.to_string(),
            },
        )
        .await
        .unwrap();
        create_profile(pool, &user.id, "Ada Styles").await.unwrap();
        user.id
    }

    pub async fn client(pool: &SqlitePool, email: &str, name: &str) -> String {
        create_user(
            pool,
            NewUser {
                email: email.to_string(),
                display_name: name.to_string(),
                password: "secret-pass".to_string(),
                role: ROLE_CLIENT.to_string(),
            },
        )
        .await
        .unwrap()
        .id
    }

    pub async fn open_every_day(pool: &SqlitePool, professional_id: &str) {
        let day = serde_json::json!({ "open": "09:00", "close": "17:00" });
        let hours = serde_json::json!({
            "monday": day, "tuesday": day, "wednesday": day, "thursday": day,
            "friday": day, "saturday": day, "sunday": day,
        });
        update_profile(
            pool,
            professional_id,
            ProfileUpdate {
                business_hours: Some(hours),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    pub async fn service(pool: &SqlitePool, professional_id: &str, price: f64) -> ServiceRow {
        create_service(
            pool,
            professional_id,
            ServiceInput {
                name: "Knotless Braids".to_string(),
                description: Some("Mid-back length".to_string()),
                price,
                duration_minutes: 60,
                requirements: None,
                active: None,
            },
        )
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let early = timestamp(Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap());
        let late = timestamp(Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap());
        assert_eq!(early, "2026-03-09T09:00:00Z");
        assert!(early < late);
    }

    #[test]
    fn parses_offsets_into_utc() {
        let parsed = parse_timestamp("2026-03-09T10:30:00+01:00").unwrap();
        assert_eq!(timestamp(parsed), "2026-03-09T09:30:00Z");
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn memory_urls_need_no_directory() {
        assert!(ensure_sqlite_dir("sqlite::memory:").is_ok());
        assert!(ensure_sqlite_dir("postgres://localhost/db").is_ok());
    }
}
