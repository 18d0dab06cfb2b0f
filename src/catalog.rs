use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{auth::new_id, db, error::AppError, models::ServiceRow};

const SERVICE_COLUMNS: &str = r#"id, professional_id, name, description, price, duration_minutes,
       requirements, active, created_at, updated_at"#;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInput {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_minutes: i64,
    pub requirements: Option<String>,
    pub active: Option<bool>,
}

impl ServiceInput {
    fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Service name is required.");
        }
        if !self.price.is_finite() || self.price < 0.0 {
            errors.push("Price must be zero or more.");
        }
        if self.duration_minutes < 5 || self.duration_minutes > 12 * 60 {
            errors.push("Duration must be between 5 minutes and 12 hours.");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(errors.join(" ")))
        }
    }
}

pub async fn create_service(
    pool: &SqlitePool,
    professional_id: &str,
    input: ServiceInput,
) -> Result<ServiceRow, AppError> {
    input.validate()?;
    let id = new_id();
    let now = db::now();
    sqlx::query(
        r#"INSERT INTO services
           (id, professional_id, name, description, price, duration_minutes, requirements, active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(professional_id)
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(input.price)
    .bind(input.duration_minutes)
    .bind(&input.requirements)
    .bind(input.active.unwrap_or(true))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    fetch_service(pool, &id).await
}

pub async fn fetch_service(pool: &SqlitePool, service_id: &str) -> Result<ServiceRow, AppError> {
    let query = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ? LIMIT 1");
    sqlx::query_as::<_, ServiceRow>(&query)
        .bind(service_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Service"))
}

/// Fetches a service only if `professional_id` owns it.
pub async fn fetch_owned_service(
    pool: &SqlitePool,
    professional_id: &str,
    service_id: &str,
) -> Result<ServiceRow, AppError> {
    let service = fetch_service(pool, service_id).await?;
    if service.professional_id != professional_id {
        return Err(AppError::NotFound("Service"));
    }
    Ok(service)
}

pub async fn list_services(
    pool: &SqlitePool,
    professional_id: &str,
    include_inactive: bool,
) -> Result<Vec<ServiceRow>, AppError> {
    let query = if include_inactive {
        format!("SELECT {SERVICE_COLUMNS} FROM services WHERE professional_id = ? ORDER BY name")
    } else {
        format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE professional_id = ? AND active = 1 ORDER BY name"
        )
    };
    let rows = sqlx::query_as::<_, ServiceRow>(&query)
        .bind(professional_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn update_service(
    pool: &SqlitePool,
    professional_id: &str,
    service_id: &str,
    input: ServiceInput,
) -> Result<ServiceRow, AppError> {
    input.validate()?;
    let current = fetch_owned_service(pool, professional_id, service_id).await?;
    sqlx::query(
        r#"UPDATE services SET name = ?, description = ?, price = ?, duration_minutes = ?,
                  requirements = ?, active = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(input.price)
    .bind(input.duration_minutes)
    .bind(&input.requirements)
    .bind(input.active.unwrap_or(current.active))
    .bind(db::now())
    .bind(service_id)
    .execute(pool)
    .await?;

    fetch_service(pool, service_id).await
}

/// Appointments keep pointing at their service, so removal only deactivates.
pub async fn deactivate_service(
    pool: &SqlitePool,
    professional_id: &str,
    service_id: &str,
) -> Result<(), AppError> {
    fetch_owned_service(pool, professional_id, service_id).await?;
    sqlx::query("UPDATE services SET active = 0, updated_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(service_id)
        .execute(pool)
        .await?;
    Ok(())
}
