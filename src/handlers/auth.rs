//! Authentication handlers

use crate::db::users::{self, NewUser};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::validation::ValidationError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::net::SocketAddr;
use validator::Validate;

use super::AppState;

/// Max login attempts per IP per hour
const MAX_LOGIN_ATTEMPTS: i64 = 10;

/// Max registrations per IP per hour
const MAX_REGISTER_ATTEMPTS: i64 = 5;

/// Max complaint submissions per IP per hour
pub const MAX_SUBMISSION_ATTEMPTS: i64 = 20;

// =============================================================================
// Endpoints
// =============================================================================

/// Citizen self-registration
pub async fn register(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(mut input): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let client_ip = get_client_ip(&headers, peer.map(|c| c.0), &state.trusted_proxies);
    enforce_rate_limit(&state.pool, &client_ip, "register", MAX_REGISTER_ATTEMPTS).await?;

    input.email = input.email.trim().to_lowercase();
    input.validate().map_err(ValidationError::from)?;

    if users::email_exists(&state.pool, &input.email).await? {
        return Err(ValidationError::invalid("email", "already registered").into());
    }

    let password_hash = hash_password(&input.password)?;
    let user = users::insert_user(
        &state.pool,
        NewUser {
            first_name: input.first_name.trim(),
            last_name: input.last_name.trim(),
            email: &input.email,
            phone: input.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
            password_hash: &password_hash,
            role: UserRole::Citizen,
            organization_id: None,
            district_id: None,
            sector_id: None,
        },
    )
    .await?;

    tracing::info!("Citizen {} registered", user.id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse::from(user))),
    ))
}

/// Password login; returns a bearer token
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let client_ip = get_client_ip(&headers, peer.map(|c| c.0), &state.trusted_proxies);
    enforce_rate_limit(&state.pool, &client_ip, "login", MAX_LOGIN_ATTEMPTS).await?;

    let email = input.email.trim().to_lowercase();
    // Same answer for unknown email and wrong password
    let invalid = || AppError::Unauthenticated("Invalid email or password");

    let user = users::find_active_user_by_email(&state.pool, &email)
        .await?
        .ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|_| {
        AppError::Internal(format!("invalid password hash stored for user {}", user.id))
    })?;
    if Argon2::default()
        .verify_password(input.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        tracing::info!("Failed login for user {} from {}", user.id, client_ip);
        return Err(invalid());
    }

    let token = generate_session_token();
    let expires_at = Utc::now() + Duration::hours(state.session_expiry_hours);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(500).collect::<String>());

    users::create_session(
        &state.pool,
        user.id,
        &hash_token(&token),
        expires_at,
        &client_ip,
        user_agent.as_deref(),
    )
    .await?;

    if let Err(e) = users::touch_last_login(&state.pool, user.id).await {
        tracing::warn!("Failed to update last login for {}: {}", user.id, e);
    }

    tracing::info!("User {} ({:?}) logged in", user.id, user.role);

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(LoginResponse {
            token,
            expires_at,
            user: UserResponse::from(user),
        })),
    ))
}

/// End the current session
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    if let Some(token) = extract_bearer_token(&headers) {
        users::delete_session(&state.pool, &hash_token(&token)).await?;
    }
    Ok((StatusCode::OK, Json(ApiResponse::success(()))))
}

/// Current user
pub async fn me(Extension(user): Extension<User>) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(UserResponse::from(user))))
}

// =============================================================================
// Password and token utilities
// =============================================================================

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// Token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sessions store the SHA-256 of the token, never the token itself
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// Client IP and rate limiting
// =============================================================================

/// Client address for rate limiting. Forwarding headers are honoured only
/// when the direct peer matches one of the trusted proxy prefixes.
pub fn get_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[String],
) -> String {
    let peer_ip = peer.map(|addr| addr.ip().to_string());

    let behind_trusted_proxy = peer_ip
        .as_deref()
        .is_some_and(|ip| trusted_proxies.iter().any(|prefix| ip.starts_with(prefix.as_str())));

    if behind_trusted_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer_ip.unwrap_or_else(|| "unknown".to_string())
}

/// Refuse the request once `max` attempts were recorded within the hour,
/// otherwise record this one.
pub async fn enforce_rate_limit(
    pool: &PgPool,
    ip: &str,
    endpoint: &str,
    max: i64,
) -> AppResult<()> {
    if users::recent_attempts(pool, ip, endpoint).await? >= max {
        tracing::warn!("Rate limit hit for {} on {}", ip, endpoint);
        return Err(AppError::RateLimited);
    }
    users::record_attempt(pool, ip, endpoint).await?;
    Ok(())
}
