//! Organization registry handlers

use crate::db::organizations;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::validation::ValidationError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use validator::Validate;

use super::AppState;

/// Registered organizations, by name
pub async fn list_organizations(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let items = organizations::list_organizations(&state.pool).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(items))))
}

/// Register an organization (superadmin only)
pub async fn create_organization(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(mut input): Json<CreateOrganizationRequest>,
) -> AppResult<impl IntoResponse> {
    if user.role != UserRole::Superadmin {
        return Err(AppError::Forbidden(
            "Only the superadmin can register organizations".to_string(),
        ));
    }

    input.name = input.name.trim().to_string();
    input.validate().map_err(ValidationError::from)?;
    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let organization =
        organizations::insert_organization(&state.pool, &input.name, description).await?;
    tracing::info!(
        "Superadmin {} registered organization {} ({})",
        user.id,
        organization.name,
        organization.id
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(organization))))
}
