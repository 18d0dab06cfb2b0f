use actix_web::{dev::ServiceRequest, web, Error, HttpMessage};
use actix_web_httpauth::extractors::basic::BasicAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    db,
    error::AppError,
    models::{UserRow, ROLE_CLIENT, ROLE_PROFESSIONAL},
    state::AppState,
};

pub const AUTH_REALM: &str = "Botglam";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_professional(&self) -> bool {
        self.role == ROLE_PROFESSIONAL
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: String,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Opaque token for payment references and invitation links.
pub fn new_token(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates `input` and hashes the password. Nothing is written yet.
pub fn prepare_user(input: NewUser) -> Result<UserRow, AppError> {
    let email = normalize_email(&input.email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::validation("A valid email address is required."));
    }
    if input.display_name.trim().is_empty() {
        return Err(AppError::validation("Display name is required."));
    }
    if input.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    if input.role != ROLE_PROFESSIONAL && input.role != ROLE_CLIENT {
        return Err(AppError::validation("Role must be professional or client."));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|err| AppError::Internal(format!("password hash failed: {err}")))?;

    Ok(UserRow {
        id: new_id(),
        email,
        display_name: input.display_name.trim().to_string(),
        role: input.role,
        password_hash,
        active: true,
        created_at: db::now(),
    })
}

pub async fn insert_user(conn: &mut SqliteConnection, user: &UserRow) -> Result<(), AppError> {
    let existing = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = ? LIMIT 1")
        .bind(&user.email)
        .fetch_optional(&mut *conn)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("An account with this email already exists.".into()));
    }

    sqlx::query(
        r#"INSERT INTO users (id, email, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.role)
    .bind(&user.password_hash)
    .bind(&user.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn create_user(pool: &SqlitePool, input: NewUser) -> Result<UserRow, AppError> {
    let user = prepare_user(input)?;
    let mut conn = pool.acquire().await?;
    insert_user(&mut conn, &user).await?;
    Ok(user)
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<UserRow>, AppError> {
    let user = sqlx::query_as::<_, UserRow>(
        r#"SELECT id, email, display_name, role, password_hash, active, created_at
           FROM users
           WHERE email = ?
           LIMIT 1"#,
    )
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn authenticate_credentials(
    pool: &SqlitePool,
    email: &str,
    password: &str,
) -> Option<AuthUser> {
    let user = match find_user_by_email(pool, email).await {
        Ok(Some(user)) if user.active => user,
        Ok(_) => return None,
        Err(err) => {
            log::warn!("Credential lookup failed: {err}");
            return None;
        }
    };

    if !verify_password(password, &user.password_hash) {
        return None;
    }

    Some(AuthUser {
        id: user.id,
        email: user.email,
        display_name: user.display_name,
        role: user.role,
    })
}

async fn authenticate(req: &ServiceRequest, credentials: &BasicAuth) -> Result<AuthUser, Error> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Unauthorized)?;
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(&state.db, credentials.user_id(), password)
        .await
        .ok_or_else(|| AppError::Unauthorized.into())
}

async fn validate_role(
    req: ServiceRequest,
    credentials: BasicAuth,
    role: Option<&str>,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            if let Some(role) = role {
                if user.role != role {
                    let err = AppError::Forbidden(format!("{role} access required"));
                    return Err((err.into(), req));
                }
            }
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

pub async fn basic_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, None).await
}

pub async fn professional_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, Some(ROLE_PROFESSIONAL)).await
}

pub async fn client_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    validate_role(req, credentials, Some(ROLE_CLIENT)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn registered_user_can_authenticate() {
        let pool = testing::pool().await;
        let id = testing::client(&pool, "Amaka@Example.com", "Amaka").await;

        let user = authenticate_credentials(&pool, "amaka@example.com", "secret-pass")
            .await
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, ROLE_CLIENT);

        assert!(authenticate_credentials(&pool, "amaka@example.com", "wrong-pass")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn rejects_duplicate_emails_and_short_passwords() {
        let pool = testing::pool().await;
        testing::client(&pool, "dup@example.com", "Dup").await;

        let duplicate = create_user(
            &pool,
            NewUser {
                email: "DUP@example.com".into(),
                display_name: "Again".into(),
                password: "another-pass".into(),
                role: ROLE_CLIENT.into(),
            },
        )
        .await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        let short = create_user(
            &pool,
            NewUser {
                email: "short@example.com".into(),
                display_name: "Short".into(),
                password: "abc".into(),
                role: ROLE_CLIENT.into(),
            },
        )
        .await;
        assert!(matches!(short, Err(AppError::Validation(_))));
    }

    #[test]
    fn tokens_carry_their_prefix() {
        let token = new_token("bg");
        assert!(token.starts_with("bg_"));
        assert_eq!(token.len(), 3 + 32);
    }
}
