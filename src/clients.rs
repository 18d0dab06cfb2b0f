use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::{new_id, normalize_email},
    db,
    error::AppError,
    models::{AppointmentRow, ClientTier},
};

pub const VIP_MIN_APPOINTMENTS: i64 = 10;
pub const VIP_MIN_SPEND: f64 = 100_000.0;

pub fn classify(total_appointments: i64, total_spent: f64) -> ClientTier {
    if total_appointments >= VIP_MIN_APPOINTMENTS || total_spent >= VIP_MIN_SPEND {
        ClientTier::Vip
    } else if total_appointments <= 1 {
        ClientTier::New
    } else {
        ClientTier::Regular
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClientSummary {
    pub id: String,
    pub kind: String,
    pub client_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub total_appointments: i64,
    pub total_spent: f64,
    pub last_visit: Option<String>,
    pub notes: Option<String>,
    #[sqlx(skip)]
    pub tier: Option<ClientTier>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFilter {
    pub tier: Option<ClientTier>,
    pub q: Option<String>,
}

/// Makes sure a relationship row exists for the booking's client.
pub async fn touch_relationship(
    conn: &mut SqliteConnection,
    appointment: &AppointmentRow,
) -> Result<(), AppError> {
    upsert_totals(conn, appointment, 0, 0.0).await
}

pub async fn record_completed(
    conn: &mut SqliteConnection,
    appointment: &AppointmentRow,
) -> Result<(), AppError> {
    upsert_totals(conn, appointment, 1, appointment.total_amount).await
}

async fn upsert_totals(
    conn: &mut SqliteConnection,
    appointment: &AppointmentRow,
    visits: i64,
    spent: f64,
) -> Result<(), AppError> {
    let now = db::now();
    let last_visit = (visits > 0).then(|| appointment.start_time.clone());

    if let Some(client_id) = &appointment.client_id {
        sqlx::query(
            r#"INSERT INTO client_profiles
               (id, professional_id, client_id, total_appointments, total_spent, last_visit, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(professional_id, client_id) DO UPDATE SET
                 total_appointments = total_appointments + excluded.total_appointments,
                 total_spent = total_spent + excluded.total_spent,
                 last_visit = COALESCE(MAX(last_visit, excluded.last_visit), last_visit, excluded.last_visit),
                 updated_at = excluded.updated_at"#,
        )
        .bind(new_id())
        .bind(&appointment.professional_id)
        .bind(client_id)
        .bind(visits)
        .bind(spent)
        .bind(&last_visit)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        return Ok(());
    }

    let Some(email) = appointment.guest_email.as_deref().map(normalize_email) else {
        log::debug!("Guest appointment {} has no email; no client record kept", appointment.id);
        return Ok(());
    };

    sqlx::query(
        r#"INSERT INTO guest_clients
           (id, professional_id, name, email, phone, total_appointments, total_spent, last_visit, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(professional_id, email) DO UPDATE SET
             name = excluded.name,
             phone = COALESCE(excluded.phone, phone),
             total_appointments = total_appointments + excluded.total_appointments,
             total_spent = total_spent + excluded.total_spent,
             last_visit = COALESCE(MAX(last_visit, excluded.last_visit), last_visit, excluded.last_visit),
             updated_at = excluded.updated_at"#,
    )
    .bind(new_id())
    .bind(&appointment.professional_id)
    .bind(appointment.guest_name.as_deref().unwrap_or("Guest"))
    .bind(email)
    .bind(&appointment.guest_phone)
    .bind(visits)
    .bind(spent)
    .bind(&last_visit)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_clients(
    pool: &SqlitePool,
    professional_id: &str,
    filter: &ClientFilter,
) -> Result<Vec<ClientSummary>, AppError> {
    let rows = sqlx::query_as::<_, ClientSummary>(
        r#"SELECT cp.id, 'registered' as kind, cp.client_id, u.display_name as name, u.email,
                  NULL as phone, cp.total_appointments, cp.total_spent, cp.last_visit, cp.notes
           FROM client_profiles cp
           JOIN users u ON u.id = cp.client_id
           WHERE cp.professional_id = ?
           UNION ALL
           SELECT g.id, 'guest' as kind, NULL as client_id, g.name, g.email, g.phone,
                  g.total_appointments, g.total_spent, g.last_visit, NULL as notes
           FROM guest_clients g
           WHERE g.professional_id = ?
           ORDER BY last_visit DESC, name"#,
    )
    .bind(professional_id)
    .bind(professional_id)
    .fetch_all(pool)
    .await?;

    let needle = filter
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    Ok(rows
        .into_iter()
        .map(|mut row| {
            row.tier = Some(classify(row.total_appointments, row.total_spent));
            row
        })
        .filter(|row| filter.tier.is_none() || row.tier == filter.tier)
        .filter(|row| match &needle {
            Some(needle) => {
                row.name.to_lowercase().contains(needle)
                    || row
                        .email
                        .as_deref()
                        .map(|email| email.to_lowercase().contains(needle))
                        .unwrap_or(false)
            }
            None => true,
        })
        .collect())
}

pub async fn set_client_notes(
    pool: &SqlitePool,
    professional_id: &str,
    client_profile_id: &str,
    notes: &str,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE client_profiles SET notes = ?, updated_at = ? WHERE id = ? AND professional_id = ?",
    )
    .bind(notes)
    .bind(db::now())
    .bind(client_profile_id)
    .bind(professional_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Client"));
    }
    Ok(())
}

/// Rebuilds every total for `professional_id` from completed appointments.
/// Returns the number of relationship rows rewritten.
pub async fn reconcile(pool: &SqlitePool, professional_id: &str) -> Result<u64, AppError> {
    let now = db::now();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT OR IGNORE INTO client_profiles (id, professional_id, client_id, created_at, updated_at)
           SELECT lower(hex(randomblob(16))), professional_id, client_id, ?, ?
           FROM appointments
           WHERE professional_id = ? AND client_id IS NOT NULL
           GROUP BY client_id"#,
    )
    .bind(&now)
    .bind(&now)
    .bind(professional_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"INSERT OR IGNORE INTO guest_clients (id, professional_id, name, email, phone, created_at, updated_at)
           SELECT lower(hex(randomblob(16))), professional_id, COALESCE(MAX(guest_name), 'Guest'),
                  lower(trim(guest_email)), MAX(guest_phone), ?, ?
           FROM appointments
           WHERE professional_id = ? AND client_id IS NULL AND guest_email IS NOT NULL
           GROUP BY lower(trim(guest_email))"#,
    )
    .bind(&now)
    .bind(&now)
    .bind(professional_id)
    .execute(&mut *tx)
    .await?;

    let registered = sqlx::query(
        r#"UPDATE client_profiles SET
             total_appointments = (SELECT COUNT(*) FROM appointments a
                 WHERE a.professional_id = client_profiles.professional_id
                   AND a.client_id = client_profiles.client_id AND a.status = 'completed'),
             total_spent = (SELECT COALESCE(SUM(a.total_amount), 0) FROM appointments a
                 WHERE a.professional_id = client_profiles.professional_id
                   AND a.client_id = client_profiles.client_id AND a.status = 'completed'),
             last_visit = (SELECT MAX(a.start_time) FROM appointments a
                 WHERE a.professional_id = client_profiles.professional_id
                   AND a.client_id = client_profiles.client_id AND a.status = 'completed'),
             updated_at = ?
           WHERE professional_id = ?"#,
    )
    .bind(&now)
    .bind(professional_id)
    .execute(&mut *tx)
    .await?;

    let guests = sqlx::query(
        r#"UPDATE guest_clients SET
             total_appointments = (SELECT COUNT(*) FROM appointments a
                 WHERE a.professional_id = guest_clients.professional_id AND a.client_id IS NULL
                   AND lower(trim(a.guest_email)) = guest_clients.email AND a.status = 'completed'),
             total_spent = (SELECT COALESCE(SUM(a.total_amount), 0) FROM appointments a
                 WHERE a.professional_id = guest_clients.professional_id AND a.client_id IS NULL
                   AND lower(trim(a.guest_email)) = guest_clients.email AND a.status = 'completed'),
             last_visit = (SELECT MAX(a.start_time) FROM appointments a
                 WHERE a.professional_id = guest_clients.professional_id AND a.client_id IS NULL
                   AND lower(trim(a.guest_email)) = guest_clients.email AND a.status = 'completed'),
             updated_at = ?
           WHERE professional_id = ?"#,
    )
    .bind(&now)
    .bind(professional_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(registered.rows_affected() + guests.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(classify(0, 0.0), ClientTier::New);
        assert_eq!(classify(1, 50_000.0), ClientTier::New);
        assert_eq!(classify(2, 20_000.0), ClientTier::Regular);
        assert_eq!(classify(10, 0.0), ClientTier::Vip);
        assert_eq!(classify(1, 100_000.0), ClientTier::Vip);
    }

    async fn completed(pool: &SqlitePool, pro: &str, service: &str, id: &str, client: Option<&str>, email: Option<&str>, start: &str, amount: f64) {
        sqlx::query(
            r#"INSERT INTO appointments (id, professional_id, service_id, client_id, guest_name, guest_email,
                                         start_time, end_time, status, total_amount, created_at, updated_at)
               VALUES (?, ?, ?, ?, 'Bisi', ?, ?, ?, 'completed', ?, '', '')"#,
        )
        .bind(id)
        .bind(pro)
        .bind(service)
        .bind(client)
        .bind(email)
        .bind(start)
        .bind(start)
        .bind(amount)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn reconcile_rebuilds_drifted_totals() {
        let pool = testing::pool().await;
        let pro = testing::professional(&pool, "pro@example.com").await;
        let client = testing::client(&pool, "amaka@example.com", "Amaka").await;
        let service = testing::service(&pool, &pro, 20000.0).await;

        completed(&pool, &pro, &service.id, "a1", Some(&client), None, "2026-03-01T09:00:00Z", 20000.0).await;
        completed(&pool, &pro, &service.id, "a2", Some(&client), None, "2026-03-08T09:00:00Z", 25000.0).await;
        completed(&pool, &pro, &service.id, "a3", None, Some("Bisi@Example.com "), "2026-03-02T09:00:00Z", 15000.0).await;

        let rewritten = reconcile(&pool, &pro).await.unwrap();
        assert_eq!(rewritten, 2);

        let clients = list_clients(&pool, &pro, &ClientFilter::default()).await.unwrap();
        let amaka = clients.iter().find(|c| c.kind == "registered").unwrap();
        assert_eq!(amaka.total_appointments, 2);
        assert_eq!(amaka.total_spent, 45000.0);
        assert_eq!(amaka.last_visit.as_deref(), Some("2026-03-08T09:00:00Z"));
        assert_eq!(amaka.tier, Some(ClientTier::Regular));

        let bisi = clients.iter().find(|c| c.kind == "guest").unwrap();
        assert_eq!(bisi.email.as_deref(), Some("bisi@example.com"));
        assert_eq!(bisi.tier, Some(ClientTier::New));

        // Running it twice changes nothing.
        reconcile(&pool, &pro).await.unwrap();
        let again = list_clients(&pool, &pro, &ClientFilter::default()).await.unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn list_filters_by_tier_and_search() {
        let pool = testing::pool().await;
        let pro = testing::professional(&pool, "pro@example.com").await;
        let client = testing::client(&pool, "amaka@example.com", "Amaka Obi").await;
        let service = testing::service(&pool, &pro, 20000.0).await;
        completed(&pool, &pro, &service.id, "a1", Some(&client), None, "2026-03-01T09:00:00Z", 120000.0).await;
        completed(&pool, &pro, &service.id, "a2", None, Some("bisi@example.com"), "2026-03-02T09:00:00Z", 1000.0).await;
        reconcile(&pool, &pro).await.unwrap();

        let vips = list_clients(
            &pool,
            &pro,
            &ClientFilter { tier: Some(ClientTier::Vip), q: None },
        )
        .await
        .unwrap();
        assert_eq!(vips.len(), 1);
        assert_eq!(vips[0].name, "Amaka Obi");

        let search = list_clients(
            &pool,
            &pro,
            &ClientFilter { tier: None, q: Some("BISI".into()) },
        )
        .await
        .unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].kind, "guest");
    }
}
