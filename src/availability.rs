use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::{self, timestamp},
    error::AppError,
    models::{ProfileRow, ServiceRow},
};

pub const SLOT_STEP_MINUTES: i64 = 30;
/// How long an unpaid booking intent keeps its slot.
pub const INTENT_HOLD_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

pub type BusinessHours = HashMap<Weekday, DayHours>;

fn parse_time(value: Option<&serde_json::Value>, day: &str, field: &str) -> Result<NaiveTime, AppError> {
    value
        .and_then(|value| value.as_str())
        .and_then(|value| NaiveTime::parse_from_str(value.trim(), "%H:%M").ok())
        .ok_or_else(|| AppError::validation(format!("{day}: {field} must be HH:MM")))
}

/// Reads `{"monday": {"open": "09:00", "close": "17:00"}, ...}`. Missing days
/// and days marked `"closed": true` have no hours. Times are UTC.
pub fn parse_business_hours(value: &serde_json::Value) -> Result<BusinessHours, AppError> {
    let days = value
        .as_object()
        .ok_or_else(|| AppError::validation("Business hours must be an object keyed by weekday."))?;

    let mut hours = BusinessHours::new();
    for (day, entry) in days {
        let weekday: Weekday = day
            .parse()
            .map_err(|_| AppError::validation(format!("Unknown weekday: {day}")))?;
        if entry.get("closed").and_then(|v| v.as_bool()).unwrap_or(false) {
            continue;
        }
        let open = parse_time(entry.get("open"), day, "open")?;
        let close = parse_time(entry.get("close"), day, "close")?;
        if open >= close {
            return Err(AppError::validation(format!("{day}: opening time must be before closing time")));
        }
        hours.insert(weekday, DayHours { open, close });
    }
    Ok(hours)
}

fn day_window(hours: &BusinessHours, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let day = hours.get(&date.weekday())?;
    Some((
        date.and_time(day.open).and_utc(),
        date.and_time(day.close).and_utc(),
    ))
}

fn overlaps(start: DateTime<Utc>, end: DateTime<Utc>, busy: &[(DateTime<Utc>, DateTime<Utc>)]) -> bool {
    busy.iter().any(|(busy_start, busy_end)| start < *busy_end && end > *busy_start)
}

pub fn free_slots(
    hours: &BusinessHours,
    date: NaiveDate,
    duration: Duration,
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let Some((open, close)) = day_window(hours, date) else {
        return Vec::new();
    };

    let mut slots = Vec::new();
    let mut start = open;
    while start + duration <= close {
        let end = start + duration;
        if start > now && !overlaps(start, end, busy) {
            slots.push(start);
        }
        start += Duration::minutes(SLOT_STEP_MINUTES);
    }
    slots
}

/// Intervals already held on `[from, to)` by open appointments and fresh
/// unpaid booking intents.
async fn busy_intervals(
    pool: &SqlitePool,
    professional_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, AppError> {
    let hold_since = holds_since(now);
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"SELECT start_time, end_time FROM appointments
           WHERE professional_id = ? AND status IN ('pending', 'confirmed')
             AND start_time < ? AND end_time > ?
           UNION ALL
           SELECT start_time, end_time FROM booking_intents
           WHERE professional_id = ? AND status = 'initialized' AND created_at >= ?
             AND start_time < ? AND end_time > ?"#,
    )
    .bind(professional_id)
    .bind(timestamp(to))
    .bind(timestamp(from))
    .bind(professional_id)
    .bind(hold_since)
    .bind(timestamp(to))
    .bind(timestamp(from))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(start, end)| Ok((db::parse_timestamp(&start)?, db::parse_timestamp(&end)?)))
        .collect()
}

pub async fn available_slots(
    pool: &SqlitePool,
    profile: &ProfileRow,
    service: &ServiceRow,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, AppError> {
    let hours = parse_business_hours(&profile.business_hours)?;
    let Some((open, close)) = day_window(&hours, date) else {
        return Ok(Vec::new());
    };
    let busy = busy_intervals(pool, &profile.id, open, close, now).await?;
    Ok(free_slots(
        &hours,
        date,
        Duration::minutes(service.duration_minutes),
        &busy,
        now,
    ))
}

/// Validates an explicit start time against the clock and business hours and
/// returns its end time. Whether the slot is free is checked by [`ensure_free`]
/// inside the transaction that books it.
pub fn check_bookable(
    profile: &ProfileRow,
    service: &ServiceRow,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let end = start + Duration::minutes(service.duration_minutes);
    if start <= now {
        return Err(AppError::validation("Please pick a time in the future."));
    }

    let hours = parse_business_hours(&profile.business_hours)?;
    let within_hours = day_window(&hours, start.date_naive())
        .map(|(open, close)| start >= open && end <= close)
        .unwrap_or(false);
    if !within_hours {
        return Err(AppError::validation("That time is outside business hours."));
    }
    Ok(end)
}

/// Fails with `Conflict` when `[start, end)` overlaps an open appointment or,
/// with `holds_since` set, an unpaid intent created at or after it. The row
/// `except_id` (the booking being written) is ignored.
pub async fn ensure_free(
    conn: &mut SqliteConnection,
    professional_id: &str,
    start: &str,
    end: &str,
    holds_since: Option<&str>,
    except_id: &str,
) -> Result<(), AppError> {
    let clashes = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM (
               SELECT id FROM appointments
               WHERE professional_id = ? AND status IN ('pending', 'confirmed')
                 AND start_time < ? AND end_time > ? AND id != ?
               UNION ALL
               SELECT id FROM booking_intents
               WHERE professional_id = ? AND status = 'initialized'
                 AND ? IS NOT NULL AND created_at >= ?
                 AND start_time < ? AND end_time > ? AND id != ?
           )"#,
    )
    .bind(professional_id)
    .bind(end)
    .bind(start)
    .bind(except_id)
    .bind(professional_id)
    .bind(holds_since)
    .bind(holds_since)
    .bind(end)
    .bind(start)
    .bind(except_id)
    .fetch_one(&mut *conn)
    .await?;

    if clashes > 0 {
        return Err(AppError::Conflict("That time slot is no longer available.".into()));
    }
    Ok(())
}

/// Start of the window in which unpaid intents still hold their slot.
pub fn holds_since(now: DateTime<Utc>) -> String {
    timestamp(now - Duration::minutes(INTENT_HOLD_MINUTES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    fn weekday_hours() -> BusinessHours {
        parse_business_hours(&json!({
            "monday": { "open": "09:00", "close": "12:00" },
            "tue": { "open": "10:00", "close": "11:00" },
            "sunday": { "closed": true },
        }))
        .unwrap()
    }

    #[test]
    fn parses_days_and_skips_closed_ones() {
        let hours = weekday_hours();
        assert_eq!(hours.len(), 2);
        assert!(hours.contains_key(&Weekday::Mon));
        assert!(hours.contains_key(&Weekday::Tue));
        assert!(!hours.contains_key(&Weekday::Sun));
    }

    #[test]
    fn rejects_malformed_hours() {
        assert!(parse_business_hours(&json!({ "funday": { "open": "09:00", "close": "10:00" } })).is_err());
        assert!(parse_business_hours(&json!({ "monday": { "open": "9am", "close": "10:00" } })).is_err());
        assert!(parse_business_hours(&json!({ "monday": { "open": "12:00", "close": "10:00" } })).is_err());
        assert!(parse_business_hours(&json!(["monday"])).is_err());
    }

    #[test]
    fn slots_fit_duration_and_skip_busy_time() {
        // 2026-03-09 is a Monday.
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let busy = vec![(at(9, 10, 0), at(9, 11, 0))];
        let slots = free_slots(&weekday_hours(), date, Duration::minutes(60), &busy, at(1, 0, 0));
        assert_eq!(slots, vec![at(9, 9, 0), at(9, 11, 0)]);
    }

    #[test]
    fn past_and_closed_days_have_no_slots() {
        let monday = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let slots = free_slots(&weekday_hours(), monday, Duration::minutes(30), &[], at(9, 11, 0));
        assert_eq!(slots, vec![at(9, 11, 30)]);

        let sunday = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        assert!(free_slots(&weekday_hours(), sunday, Duration::minutes(30), &[], at(1, 0, 0)).is_empty());
    }

    #[tokio::test]
    async fn booked_time_is_unavailable() {
        use crate::db::testing;
        use crate::profiles::fetch_profile;

        let pool = testing::pool().await;
        let pro = testing::professional(&pool, "pro@example.com").await;
        testing::open_every_day(&pool, &pro).await;
        let service = testing::service(&pool, &pro, 10000.0).await;
        let profile = fetch_profile(&pool, &pro).await.unwrap();

        sqlx::query(
            r#"INSERT INTO appointments (id, professional_id, service_id, guest_name, start_time, end_time,
                                         status, total_amount, created_at, updated_at)
               VALUES ('a1', ?, ?, 'Guest', '2026-03-09T10:00:00Z', '2026-03-09T11:00:00Z', 'confirmed', 10000, '', '')"#,
        )
        .bind(&pro)
        .bind(&service.id)
        .execute(&pool)
        .await
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let slots = available_slots(&pool, &profile, &service, date, at(1, 0, 0)).await.unwrap();
        assert!(slots.contains(&at(9, 9, 0)));
        assert!(!slots.contains(&at(9, 9, 30)));
        assert!(!slots.contains(&at(9, 10, 0)));
        assert!(slots.contains(&at(9, 11, 0)));

        let late = check_bookable(&profile, &service, at(9, 16, 30), at(1, 0, 0));
        assert!(matches!(late, Err(AppError::Validation(_))));
        let past = check_bookable(&profile, &service, at(9, 14, 0), at(9, 15, 0));
        assert!(matches!(past, Err(AppError::Validation(_))));
        let end = check_bookable(&profile, &service, at(9, 14, 0), at(1, 0, 0)).unwrap();
        assert_eq!(end, at(9, 15, 0));

        let mut conn = pool.acquire().await.unwrap();
        let clash = ensure_free(&mut conn, &pro, "2026-03-09T10:30:00Z", "2026-03-09T11:30:00Z", None, "new").await;
        assert!(matches!(clash, Err(AppError::Conflict(_))));
        // The appointment does not clash with itself.
        ensure_free(&mut conn, &pro, "2026-03-09T10:00:00Z", "2026-03-09T11:00:00Z", None, "a1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unpaid_intents_hold_until_they_lapse() {
        use crate::db::testing;

        let pool = testing::pool().await;
        let pro = testing::professional(&pool, "pro@example.com").await;
        let service = testing::service(&pool, &pro, 10000.0).await;
        sqlx::query(
            r#"INSERT INTO booking_intents (id, reference, professional_id, service_id, guest_name, start_time,
                                            end_time, deposit_amount, total_amount, currency, status, created_at)
               VALUES ('i1', 'bg_1', ?, ?, 'Guest', '2026-03-09T10:00:00Z', '2026-03-09T11:00:00Z',
                       3000, 10000, 'NGN', 'initialized', '2026-03-09T01:00:00Z')"#,
        )
        .bind(&pro)
        .bind(&service.id)
        .execute(&pool)
        .await
        .unwrap();

        let (start, end) = ("2026-03-09T10:00:00Z", "2026-03-09T11:00:00Z");
        let mut conn = pool.acquire().await.unwrap();
        let held = ensure_free(&mut conn, &pro, start, end, Some(holds_since(at(9, 1, 20)).as_str()), "new").await;
        assert!(matches!(held, Err(AppError::Conflict(_))));
        ensure_free(&mut conn, &pro, start, end, Some(holds_since(at(9, 1, 31)).as_str()), "new")
            .await
            .unwrap();
        // Paid bookings ignore unpaid holds.
        ensure_free(&mut conn, &pro, start, end, None, "new").await.unwrap();
    }
}
