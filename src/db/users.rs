//! Users, sessions and rate-limit bookkeeping

use crate::db::ConstraintViolation;
use crate::error::{AppError, AppResult};
use crate::models::{User, UserRole};
use crate::validation::ValidationError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Fields of a user account about to be created
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
}

pub async fn find_active_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1 AND is_active = true")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(pool)
        .await
}

/// Create an account. A taken email or an unknown organization is reported
/// as a validation error on that field.
pub async fn insert_user(pool: &PgPool, user: NewUser<'_>) -> AppResult<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (first_name, last_name, email, phone, password_hash, role,
                           organization_id, district_id, sector_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(user.first_name)
    .bind(user.last_name)
    .bind(user.email)
    .bind(user.phone)
    .bind(user.password_hash)
    .bind(user.role)
    .bind(user.organization_id)
    .bind(user.district_id)
    .bind(user.sector_id)
    .fetch_one(pool)
    .await
    .map_err(insert_user_error)
}

fn insert_user_error(e: sqlx::Error) -> AppError {
    match ConstraintViolation::of(&e) {
        Some(ConstraintViolation::Unique) => {
            ValidationError::invalid("email", "already registered").into()
        }
        Some(ConstraintViolation::ForeignKey) => {
            ValidationError::invalid("organizationId", "unknown organization").into()
        }
        None => e.into(),
    }
}

pub async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// Sessions
// =============================================================================

pub async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
    ip_address: &str,
    user_agent: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions (user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .execute(pool)
    .await?;
    Ok(())
}

const SESSION_USER_QUERY: &str = r#"
    SELECT u.* FROM sessions s
    JOIN users u ON u.id = s.user_id
    WHERE s.token_hash = $1 AND s.expires_at > NOW() AND u.is_active = true
"#;

/// The active user behind an unexpired session
pub async fn find_session_user(pool: &PgPool, token_hash: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(SESSION_USER_QUERY)
        .bind(token_hash)
        .fetch_optional(pool)
        .await
}

pub async fn delete_session(pool: &PgPool, token_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Attempts recorded for an IP and endpoint within the last hour
pub async fn recent_attempts(pool: &PgPool, ip: &str, endpoint: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM rate_limit_attempts
        WHERE ip_address = $1 AND endpoint = $2
        AND attempted_at > NOW() - INTERVAL '1 hour'
        "#,
    )
    .bind(ip)
    .bind(endpoint)
    .fetch_one(pool)
    .await
}

pub async fn record_attempt(pool: &PgPool, ip: &str, endpoint: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO rate_limit_attempts (ip_address, endpoint) VALUES ($1, $2)")
        .bind(ip)
        .bind(endpoint)
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// Maintenance
// =============================================================================

/// Remove expired sessions and rate-limit rows older than a day.
/// Returns `(sessions, attempts)` deleted.
pub async fn purge_expired(pool: &PgPool) -> Result<(u64, u64), sqlx::Error> {
    let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
        .execute(pool)
        .await?
        .rows_affected();

    let attempts = sqlx::query(
        "DELETE FROM rate_limit_attempts WHERE attempted_at < NOW() - INTERVAL '24 hours'",
    )
    .execute(pool)
    .await?
    .rows_affected();

    Ok((sessions, attempts))
}

/// Create the superadmin account unless one with this email already exists.
/// Returns whether an account was created.
pub async fn ensure_superadmin(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
) -> Result<bool, sqlx::Error> {
    let created = sqlx::query(
        r#"
        INSERT INTO users (first_name, last_name, email, password_hash, role)
        VALUES ('System', 'Administrator', $1, $2, 'superadmin')
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(created > 0)
}
