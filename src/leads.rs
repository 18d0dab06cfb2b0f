use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::{self, new_id, new_token, normalize_email, AuthUser, NewUser},
    db::{self, timestamp},
    email::{self, LeadInvitationEmail},
    error::AppError,
    models::{LeadFormRow, LeadRow, LeadScore, LeadStatus, ROLE_CLIENT},
    profiles,
    state::AppState,
};

pub const HOT_WITHIN_DAYS: i64 = 3;
pub const WARM_WITHIN_DAYS: i64 = 14;

const LEAD_COLUMNS: &str = "id, professional_id, form_id, name, email, phone, data, score, status, \
    invitation_token, invited_at, converted_client_id, created_at, updated_at";

pub fn score_lead(
    email: Option<&str>,
    phone: Option<&str>,
    submitted_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> LeadScore {
    let present = |value: Option<&str>| value.map(|v| !v.trim().is_empty()).unwrap_or(false);
    let age = now - submitted_at;
    if present(email) && present(phone) && age <= Duration::days(HOT_WITHIN_DAYS) {
        LeadScore::Hot
    } else if age <= Duration::days(WARM_WITHIN_DAYS) {
        LeadScore::Warm
    } else {
        LeadScore::Cold
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadFormInput {
    pub title: String,
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
    pub active: Option<bool>,
}

fn validate_form(input: &LeadFormInput) -> Result<(), AppError> {
    if input.title.trim().is_empty() {
        return Err(AppError::validation("Form title is required."));
    }
    if let Some(fields) = &input.fields {
        if !fields.is_array() {
            return Err(AppError::validation("Form fields must be a list."));
        }
    }
    Ok(())
}

pub async fn create_form(
    pool: &SqlitePool,
    professional_id: &str,
    input: LeadFormInput,
) -> Result<LeadFormRow, AppError> {
    validate_form(&input)?;
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO lead_forms (id, professional_id, title, fields, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(professional_id)
    .bind(input.title.trim())
    .bind(input.fields.unwrap_or_else(|| serde_json::json!([])).to_string())
    .bind(input.active.unwrap_or(true))
    .bind(db::now())
    .execute(pool)
    .await?;
    fetch_form(pool, professional_id, &id).await
}

pub async fn fetch_form(
    pool: &SqlitePool,
    professional_id: &str,
    form_id: &str,
) -> Result<LeadFormRow, AppError> {
    sqlx::query_as::<_, LeadFormRow>(
        r#"SELECT id, professional_id, title, fields, active, created_at
           FROM lead_forms WHERE id = ? AND professional_id = ? LIMIT 1"#,
    )
    .bind(form_id)
    .bind(professional_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Lead form"))
}

pub async fn list_forms(
    pool: &SqlitePool,
    professional_id: &str,
    include_inactive: bool,
) -> Result<Vec<LeadFormRow>, AppError> {
    let rows = sqlx::query_as::<_, LeadFormRow>(
        r#"SELECT id, professional_id, title, fields, active, created_at
           FROM lead_forms
           WHERE professional_id = ? AND (? OR active = 1)
           ORDER BY created_at ASC"#,
    )
    .bind(professional_id)
    .bind(include_inactive)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_form(
    pool: &SqlitePool,
    professional_id: &str,
    form_id: &str,
    input: LeadFormInput,
) -> Result<LeadFormRow, AppError> {
    validate_form(&input)?;
    let current = fetch_form(pool, professional_id, form_id).await?;
    sqlx::query("UPDATE lead_forms SET title = ?, fields = ?, active = ? WHERE id = ?")
        .bind(input.title.trim())
        .bind(input.fields.unwrap_or(current.fields).to_string())
        .bind(input.active.unwrap_or(current.active))
        .bind(form_id)
        .execute(pool)
        .await?;
    fetch_form(pool, professional_id, form_id).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadSubmission {
    pub form_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Public submission against the professional behind `slug`.
pub async fn submit_lead(
    pool: &SqlitePool,
    slug: &str,
    submission: LeadSubmission,
    now: DateTime<Utc>,
) -> Result<LeadRow, AppError> {
    let profile = profiles::fetch_profile_by_slug(pool, slug).await?;
    if let Some(form_id) = &submission.form_id {
        let form = fetch_form(pool, &profile.id, form_id).await?;
        if !form.active {
            return Err(AppError::NotFound("Lead form"));
        }
    }

    let name = submission.name.trim();
    let email = submission
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty());
    let phone = submission
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
        .map(str::to_string);
    if name.is_empty() {
        return Err(AppError::validation("Your name is required."));
    }
    if email.is_none() && phone.is_none() {
        return Err(AppError::validation("An email or phone number is required."));
    }
    let data = submission.data.unwrap_or_else(|| serde_json::json!({}));
    if !data.is_object() {
        return Err(AppError::validation("Lead data must be an object."));
    }

    let id = new_id();
    let created = timestamp(now);
    sqlx::query(
        r#"INSERT INTO leads (id, professional_id, form_id, name, email, phone, data, score, status, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&profile.id)
    .bind(&submission.form_id)
    .bind(name)
    .bind(&email)
    .bind(&phone)
    .bind(data.to_string())
    .bind(score_lead(email.as_deref(), phone.as_deref(), now, now))
    .bind(LeadStatus::New)
    .bind(&created)
    .bind(&created)
    .execute(pool)
    .await?;

    db::log_activity(
        pool,
        "lead_submitted",
        &format!("New lead from {name}."),
        Some(&profile.id),
        None,
    )
    .await;

    fetch_lead(pool, &profile.id, &id).await
}

pub async fn fetch_lead(pool: &SqlitePool, professional_id: &str, lead_id: &str) -> Result<LeadRow, AppError> {
    let query = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ? AND professional_id = ? LIMIT 1");
    sqlx::query_as::<_, LeadRow>(&query)
        .bind(lead_id)
        .bind(professional_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Lead"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub score: Option<LeadScore>,
    pub status: Option<LeadStatus>,
}

pub async fn list_leads(
    pool: &SqlitePool,
    professional_id: &str,
    filter: &LeadFilter,
) -> Result<Vec<LeadRow>, AppError> {
    let query = format!(
        r#"SELECT {LEAD_COLUMNS} FROM leads
           WHERE professional_id = ? AND (? IS NULL OR score = ?) AND (? IS NULL OR status = ?)
           ORDER BY created_at DESC"#
    );
    let rows = sqlx::query_as::<_, LeadRow>(&query)
        .bind(professional_id)
        .bind(filter.score)
        .bind(filter.score)
        .bind(filter.status)
        .bind(filter.status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Manual status moves. `invited` and `converted` belong to the invitation
/// flow and cannot be set here.
pub async fn set_status(
    pool: &SqlitePool,
    professional_id: &str,
    lead_id: &str,
    status: LeadStatus,
) -> Result<LeadRow, AppError> {
    let lead = fetch_lead(pool, professional_id, lead_id).await?;
    match (lead.status, status) {
        (LeadStatus::Converted, _) => {
            return Err(AppError::Conflict("This lead is already a client.".into()));
        }
        (_, LeadStatus::Invited | LeadStatus::Converted) => {
            return Err(AppError::validation(
                "Send an invitation to move a lead to invited or converted.",
            ));
        }
        (LeadStatus::Lost, LeadStatus::Lost) => return Ok(lead),
        _ => {}
    }

    let updated = sqlx::query("UPDATE leads SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(status)
        .bind(db::now())
        .bind(lead_id)
        .bind(lead.status)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict("This lead was changed by someone else. Refresh and try again.".into()));
    }
    fetch_lead(pool, professional_id, lead_id).await
}

/// Recomputes scores for every open lead against `now`. Returns how many changed.
pub async fn rescore(pool: &SqlitePool, professional_id: &str, now: DateTime<Utc>) -> Result<u64, AppError> {
    let leads = list_leads(pool, professional_id, &LeadFilter::default()).await?;
    let mut changed = 0;
    let mut tx = pool.begin().await?;
    for lead in leads
        .iter()
        .filter(|lead| !matches!(lead.status, LeadStatus::Converted | LeadStatus::Lost))
    {
        let submitted = db::parse_timestamp(&lead.created_at)?;
        let score = score_lead(lead.email.as_deref(), lead.phone.as_deref(), submitted, now);
        if score == lead.score {
            continue;
        }
        sqlx::query("UPDATE leads SET score = ?, updated_at = ? WHERE id = ?")
            .bind(score)
            .bind(db::now())
            .bind(&lead.id)
            .execute(&mut *tx)
            .await?;
        changed += 1;
    }
    tx.commit().await?;
    Ok(changed)
}

/// Issues a fresh invitation token and emails the acceptance link.
pub async fn invite_lead(state: &AppState, professional: &AuthUser, lead_id: &str) -> Result<LeadRow, AppError> {
    let lead = fetch_lead(&state.db, &professional.id, lead_id).await?;
    if matches!(lead.status, LeadStatus::Converted | LeadStatus::Lost) {
        return Err(AppError::Conflict(format!("Cannot invite a lead that is {}.", lead.status)));
    }
    let Some(to) = lead.email.clone() else {
        return Err(AppError::validation("This lead has no email address to invite."));
    };

    let token = new_token("inv");
    let now = db::now();
    let updated = sqlx::query(
        r#"UPDATE leads SET status = ?, invitation_token = ?, invited_at = ?, updated_at = ?
           WHERE id = ? AND status = ?"#,
    )
    .bind(LeadStatus::Invited)
    .bind(&token)
    .bind(&now)
    .bind(&now)
    .bind(lead_id)
    .bind(lead.status)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict("This lead was changed by someone else. Refresh and try again.".into()));
    }

    let profile = profiles::fetch_profile(&state.db, &professional.id).await?;
    let message = LeadInvitationEmail {
        lead_name: lead.name.clone(),
        business_name: profile.business_name.clone(),
        invitation_url: state.link(&format!("invitations/{token}")),
    };
    email::send_template(
        &state.mailer,
        &to,
        &format!("{} invited you to book", profile.business_name),
        &message,
    )
    .await;

    db::log_activity(
        &state.db,
        "lead_invited",
        &format!("{} invited {}.", professional.display_name, lead.name),
        Some(&professional.id),
        None,
    )
    .await;

    fetch_lead(&state.db, &professional.id, lead_id).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptInvitation {
    pub password: String,
    pub display_name: Option<String>,
}

/// Turns an invited lead into a client account. An existing client with the
/// lead's email must prove it with their password.
pub async fn accept_invitation(
    pool: &SqlitePool,
    token: &str,
    input: AcceptInvitation,
) -> Result<AuthUser, AppError> {
    let query = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE invitation_token = ? AND status = ? LIMIT 1");
    let lead = sqlx::query_as::<_, LeadRow>(&query)
        .bind(token.trim())
        .bind(LeadStatus::Invited)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Invitation"))?;
    let email = lead
        .email
        .clone()
        .ok_or_else(|| AppError::validation("This invitation has no email address."))?;

    let (client, new_user) = match auth::find_user_by_email(pool, &email).await? {
        Some(existing) if existing.role != ROLE_CLIENT => {
            return Err(AppError::Conflict("This email belongs to a professional account.".into()));
        }
        Some(_) => {
            let client = auth::authenticate_credentials(pool, &email, &input.password)
                .await
                .ok_or(AppError::Unauthorized)?;
            (client, None)
        }
        None => {
            let display_name = input
                .display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| lead.name.clone());
            let user = auth::prepare_user(NewUser {
                email,
                display_name,
                password: input.password,
                role: ROLE_CLIENT.to_string(),
            })?;
            let client = AuthUser {
                id: user.id.clone(),
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: user.role.clone(),
            };
            (client, Some(user))
        }
    };

    let now = db::now();
    let mut tx = pool.begin().await?;
    // The account only exists if the lead is claimed in the same commit.
    if let Some(user) = &new_user {
        auth::insert_user(&mut tx, user).await?;
    }
    let claimed = sqlx::query(
        r#"UPDATE leads SET status = ?, converted_client_id = ?, invitation_token = NULL, updated_at = ?
           WHERE id = ? AND status = ?"#,
    )
    .bind(LeadStatus::Converted)
    .bind(&client.id)
    .bind(&now)
    .bind(&lead.id)
    .bind(LeadStatus::Invited)
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        return Err(AppError::Conflict("This invitation was already used.".into()));
    }
    sqlx::query(
        r#"INSERT INTO client_profiles (id, professional_id, client_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(professional_id, client_id) DO NOTHING"#,
    )
    .bind(new_id())
    .bind(&lead.professional_id)
    .bind(&client.id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    db::log_activity(
        pool,
        "lead_converted",
        &format!("{} accepted an invitation.", client.display_name),
        Some(&lead.professional_id),
        None,
    )
    .await;
    Ok(client)
}
