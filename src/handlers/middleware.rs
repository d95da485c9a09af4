//! Middleware for authentication and security headers

use crate::db::users;
use crate::error::AppError;
use crate::handlers::auth::{extract_bearer_token, hash_token};
use crate::handlers::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Resolve the bearer token to an active user, available to handlers via
/// `Extension<User>`
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(request.headers()) else {
        return AppError::Unauthenticated("Not authenticated").into_response();
    };

    let user = match users::find_session_user(&state.pool, &hash_token(&token)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return AppError::Unauthenticated("Session expired or invalid").into_response();
        }
        Err(e) => {
            tracing::error!("Database error during session validation: {}", e);
            return AppError::Internal("authentication error".to_string()).into_response();
        }
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Security headers middleware
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if state.is_production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }

    response
}
