use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    availability::parse_business_hours,
    db,
    error::AppError,
    models::{DepositType, ProfileRow},
};

const PROFILE_COLUMNS: &str = r#"id, slug, business_name, full_name, avatar_url, bio, phone, location,
       business_hours, social_links, brand_primary, brand_accent, deposit_type,
       deposit_value, currency, paystack_subaccount, created_at, updated_at"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub slug: Option<String>,
    pub business_name: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub business_hours: Option<serde_json::Value>,
    pub social_links: Option<serde_json::Value>,
    pub brand_primary: Option<String>,
    pub brand_accent: Option<String>,
    pub deposit_type: Option<DepositType>,
    pub deposit_value: Option<f64>,
    pub currency: Option<String>,
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "studio".to_string()
    } else {
        slug
    }
}

fn validate_slug(slug: &str) -> Result<(), AppError> {
    let valid_chars = slug
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    if slug.len() < 3 || slug.len() > 40 || !valid_chars || slug.starts_with('-') || slug.ends_with('-') {
        return Err(AppError::validation(
            "Slug must be 3-40 characters of lowercase letters, digits and hyphens.",
        ));
    }
    Ok(())
}

fn validate_colour(value: &str) -> Result<(), AppError> {
    let hex = value.strip_prefix('#').unwrap_or("");
    if hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(AppError::validation(format!("Invalid brand colour: {value}")))
    }
}

fn validate_deposit(kind: DepositType, value: f64) -> Result<(), AppError> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::validation("Deposit value must be a positive number."));
    }
    if kind == DepositType::Percentage && value > 100.0 {
        return Err(AppError::validation("Deposit percentage cannot exceed 100."));
    }
    Ok(())
}

pub async fn create_profile(
    pool: &SqlitePool,
    user_id: &str,
    business_name: &str,
) -> Result<ProfileRow, AppError> {
    let base = slugify(business_name);
    let mut slug = base.clone();
    let mut suffix = 2;
    while slug_taken(pool, &slug, None).await? {
        slug = format!("{base}-{suffix}");
        suffix += 1;
    }

    let now = db::now();
    sqlx::query(
        r#"INSERT INTO profiles (id, slug, business_name, full_name, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(user_id)
    .bind(&slug)
    .bind(business_name.trim())
    .bind(business_name.trim())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    fetch_profile(pool, user_id).await
}

async fn slug_taken(pool: &SqlitePool, slug: &str, except: Option<&str>) -> Result<bool, AppError> {
    let owner = sqlx::query_scalar::<_, String>("SELECT id FROM profiles WHERE slug = ? LIMIT 1")
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    Ok(match owner {
        Some(id) => Some(id.as_str()) != except,
        None => false,
    })
}

pub async fn fetch_profile(pool: &SqlitePool, user_id: &str) -> Result<ProfileRow, AppError> {
    let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ? LIMIT 1");
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Profile"))
}

pub async fn fetch_profile_by_slug(pool: &SqlitePool, slug: &str) -> Result<ProfileRow, AppError> {
    let query = format!(
        r#"SELECT {PROFILE_COLUMNS} FROM profiles
           WHERE slug = ? AND id IN (SELECT id FROM users WHERE active = 1)
           LIMIT 1"#
    );
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(slug.trim().to_lowercase())
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Profile"))
}

pub async fn update_profile(
    pool: &SqlitePool,
    user_id: &str,
    update: ProfileUpdate,
) -> Result<ProfileRow, AppError> {
    let mut profile = fetch_profile(pool, user_id).await?;

    if let Some(slug) = update.slug {
        let slug = slug.trim().to_lowercase();
        validate_slug(&slug)?;
        if slug_taken(pool, &slug, Some(user_id)).await? {
            return Err(AppError::Conflict("That profile link is already taken.".into()));
        }
        profile.slug = slug;
    }
    if let Some(name) = update.business_name {
        if name.trim().is_empty() {
            return Err(AppError::validation("Business name is required."));
        }
        profile.business_name = name.trim().to_string();
    }
    if let Some(name) = update.full_name {
        profile.full_name = name.trim().to_string();
    }
    if let Some(hours) = update.business_hours {
        parse_business_hours(&hours)?;
        profile.business_hours = hours;
    }
    if let Some(links) = update.social_links {
        if !links.is_object() {
            return Err(AppError::validation("Social links must be an object."));
        }
        profile.social_links = links;
    }
    for colour in [&update.brand_primary, &update.brand_accent].into_iter().flatten() {
        validate_colour(colour)?;
    }
    if update.brand_primary.is_some() {
        profile.brand_primary = update.brand_primary;
    }
    if update.brand_accent.is_some() {
        profile.brand_accent = update.brand_accent;
    }
    if let Some(kind) = update.deposit_type {
        profile.deposit_type = kind;
    }
    if let Some(value) = update.deposit_value {
        profile.deposit_value = value;
    }
    validate_deposit(profile.deposit_type, profile.deposit_value)?;
    if let Some(currency) = update.currency {
        let currency = currency.trim().to_uppercase();
        if currency.len() != 3 {
            return Err(AppError::validation("Currency must be a 3-letter code."));
        }
        profile.currency = currency;
    }
    profile.avatar_url = update.avatar_url.or(profile.avatar_url);
    profile.bio = update.bio.or(profile.bio);
    profile.phone = update.phone.or(profile.phone);
    profile.location = update.location.or(profile.location);

    sqlx::query(
        r#"UPDATE profiles SET slug = ?, business_name = ?, full_name = ?, avatar_url = ?, bio = ?,
                  phone = ?, location = ?, business_hours = ?, social_links = ?, brand_primary = ?,
                  brand_accent = ?, deposit_type = ?, deposit_value = ?, currency = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&profile.slug)
    .bind(&profile.business_name)
    .bind(&profile.full_name)
    .bind(&profile.avatar_url)
    .bind(&profile.bio)
    .bind(&profile.phone)
    .bind(&profile.location)
    .bind(profile.business_hours.to_string())
    .bind(profile.social_links.to_string())
    .bind(&profile.brand_primary)
    .bind(&profile.brand_accent)
    .bind(profile.deposit_type)
    .bind(profile.deposit_value)
    .bind(&profile.currency)
    .bind(db::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    fetch_profile(pool, user_id).await
}

pub async fn set_subaccount(pool: &SqlitePool, user_id: &str, code: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE profiles SET paystack_subaccount = ?, updated_at = ? WHERE id = ?")
        .bind(code)
        .bind(db::now())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[test]
    fn slugs_collapse_punctuation() {
        assert_eq!(slugify("  Glam & Go Studio!! "), "glam-go-studio");
        assert_eq!(slugify("***"), "studio");
    }

    #[tokio::test]
    async fn duplicate_names_get_numbered_slugs() {
        let pool = testing::pool().await;
        let first = testing::professional(&pool, "one@example.com").await;
        let second = testing::professional(&pool, "two@example.com").await;

        assert_eq!(fetch_profile(&pool, &first).await.unwrap().slug, "ada-styles");
        assert_eq!(fetch_profile(&pool, &second).await.unwrap().slug, "ada-styles-2");
        assert_eq!(
            fetch_profile_by_slug(&pool, "ADA-STYLES-2").await.unwrap().id,
            second
        );
    }

    #[tokio::test]
    async fn update_validates_and_persists() {
        let pool = testing::pool().await;
        let id = testing::professional(&pool, "pro@example.com").await;

        let updated = update_profile(
            &pool,
            &id,
            ProfileUpdate {
                slug: Some("lashes-by-ada".into()),
                brand_primary: Some("#C66A2D".into()),
                deposit_type: Some(DepositType::Percentage),
                deposit_value: Some(30.0),
                social_links: Some(serde_json::json!({ "instagram": "@lashesbyada" })),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.slug, "lashes-by-ada");
        assert_eq!(updated.deposit_type, DepositType::Percentage);
        assert_eq!(updated.social_links["instagram"], "@lashesbyada");

        let bad_colour = update_profile(
            &pool,
            &id,
            ProfileUpdate {
                brand_accent: Some("orange".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(bad_colour, Err(AppError::Validation(_))));

        let too_much = update_profile(
            &pool,
            &id,
            ProfileUpdate {
                deposit_value: Some(150.0),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(too_much, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn slug_conflicts_are_rejected() {
        let pool = testing::pool().await;
        testing::professional(&pool, "one@example.com").await;
        let second = testing::professional(&pool, "two@example.com").await;

        let result = update_profile(
            &pool,
            &second,
            ProfileUpdate {
                slug: Some("ada-styles".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
