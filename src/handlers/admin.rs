//! Administrator handlers: account provisioning, dashboard and export

use crate::db::complaints::{self as repo, ComplaintScope, Unit};
use crate::db::users::{self, NewUser};
use crate::error::{AppError, AppResult};
use crate::handlers::auth::hash_password;
use crate::handlers::complaints::load_visible;
use crate::models::*;
use crate::validation::ValidationError;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{Cursor, Write};
use uuid::Uuid;
use validator::Validate;
use zip::write::FileOptions;
use zip::ZipWriter;

use super::AppState;

// =============================================================================
// Account provisioning
// =============================================================================

/// Role and jurisdiction of an account to be provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    role: UserRole,
    organization_id: Option<Uuid>,
    district_id: Option<Uuid>,
    sector_id: Option<Uuid>,
}

/// Each administrator creates accounts one tier below, inside their own
/// jurisdiction: superadmin -> orgadmin -> districtadmin -> sectoradmin.
fn place_new_admin(caller: &User, input: &CreateAdminRequest) -> AppResult<Placement> {
    let role = caller.role.provisions().ok_or_else(|| {
        AppError::Forbidden("Your account cannot create administrators".to_string())
    })?;

    let inherit = |field: &str, own: Option<Uuid>, requested: Option<Uuid>| -> AppResult<Uuid> {
        match (own, requested) {
            (Some(own), None) => Ok(own),
            (Some(own), Some(requested)) if own == requested => Ok(own),
            (Some(_), Some(_)) => Err(AppError::Forbidden(format!(
                "The {} is outside your jurisdiction",
                field
            ))),
            (None, _) => Err(AppError::Internal(format!(
                "administrator {} has no {}",
                caller.id, field
            ))),
        }
    };
    let must_be_empty = |field: &str, value: Option<Uuid>| -> AppResult<()> {
        match value {
            Some(_) => Err(ValidationError::invalid(field, format!("not used for {:?}", role)).into()),
            None => Ok(()),
        }
    };

    let placement = match role {
        UserRole::Orgadmin => {
            must_be_empty("districtId", input.district_id)?;
            must_be_empty("sectorId", input.sector_id)?;
            Placement {
                role,
                organization_id: Some(
                    input
                        .organization_id
                        .ok_or_else(|| ValidationError::required("organizationId"))?,
                ),
                district_id: None,
                sector_id: None,
            }
        }
        UserRole::Districtadmin => {
            must_be_empty("sectorId", input.sector_id)?;
            Placement {
                role,
                organization_id: Some(inherit(
                    "organization",
                    caller.organization_id,
                    input.organization_id,
                )?),
                district_id: Some(
                    input
                        .district_id
                        .ok_or_else(|| ValidationError::required("districtId"))?,
                ),
                sector_id: None,
            }
        }
        UserRole::Sectoradmin => Placement {
            role,
            organization_id: Some(inherit(
                "organization",
                caller.organization_id,
                input.organization_id,
            )?),
            district_id: Some(inherit("district", caller.district_id, input.district_id)?),
            sector_id: Some(
                input
                    .sector_id
                    .ok_or_else(|| ValidationError::required("sectorId"))?,
            ),
        },
        UserRole::Superadmin | UserRole::Citizen => {
            return Err(AppError::Forbidden(
                "This role cannot be provisioned".to_string(),
            ))
        }
    };

    Ok(placement)
}

/// Create an administrator account one tier below the caller
pub async fn create_admin_user(
    State(state): State<AppState>,
    Extension(caller): Extension<User>,
    Json(mut input): Json<CreateAdminRequest>,
) -> AppResult<impl IntoResponse> {
    input.email = input.email.trim().to_lowercase();
    input.validate().map_err(ValidationError::from)?;
    let placement = place_new_admin(&caller, &input)?;

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
            role: placement.role,
            organization_id: placement.organization_id,
            district_id: placement.district_id,
            sector_id: placement.sector_id,
        },
    )
    .await?;

    tracing::info!(
        "{:?} {} provisioned {:?} {}",
        caller.role,
        caller.id,
        user.role,
        user.id
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse::from(user))),
    ))
}

// =============================================================================
// Dashboard
// =============================================================================

/// Everything the user can see, for statistics
fn stats_scope(user: &User) -> AppResult<ComplaintScope> {
    match user.role {
        UserRole::Superadmin => Ok(ComplaintScope::All),
        UserRole::Citizen => Ok(ComplaintScope::Citizen(user.id)),
        UserRole::Orgadmin | UserRole::Districtadmin | UserRole::Sectoradmin => Unit::of(user)
            .map(ComplaintScope::Jurisdiction)
            .ok_or_else(|| {
                AppError::Internal(format!("administrator {} has no jurisdiction", user.id))
            }),
    }
}

/// Complaint counts within the user's scope
pub async fn get_dashboard_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<impl IntoResponse> {
    let stats = repo::dashboard_stats(&state.pool, stats_scope(&user)?).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(stats))))
}

// =============================================================================
// Export
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComplaintExport<'a> {
    complaint: &'a Complaint,
    exported_at: DateTime<Utc>,
    exported_by: Uuid,
}

/// ZIP with `complaint.json` and the stored documents under `documents/`
fn build_export_zip(
    export: &ComplaintExport<'_>,
    files: &[(String, Vec<u8>)],
) -> AppResult<Vec<u8>> {
    let zip_error = |e: zip::result::ZipError| AppError::Internal(format!("zip export failed: {}", e));

    let mut zip_buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut zip_buffer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let metadata = serde_json::to_vec_pretty(export)
            .map_err(|e| AppError::Internal(format!("failed to serialize export: {}", e)))?;
        zip.start_file("complaint.json", options).map_err(zip_error)?;
        zip.write_all(&metadata)?;

        for (name, data) in files {
            zip.start_file(format!("documents/{}", name), options)
                .map_err(zip_error)?;
            zip.write_all(data)?;
        }

        zip.finish().map_err(zip_error)?;
    }

    Ok(zip_buffer.into_inner())
}

/// Export a complaint with its documents as ZIP (administrators only)
pub async fn export_complaint(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    if user.role == UserRole::Citizen {
        return Err(AppError::Forbidden("Administrator access only".to_string()));
    }
    let complaint = load_visible(&state, &user, id).await?;

    let mut files = Vec::with_capacity(complaint.attachments.len());
    for attachment in &complaint.attachments {
        match tokio::fs::read(&attachment.storage_path).await {
            Ok(data) => files.push((format!("{}_{}", attachment.id, attachment.name), data)),
            Err(e) => tracing::warn!(
                "Skipping missing attachment {} of complaint {}: {}",
                attachment.id,
                complaint.reference,
                e
            ),
        }
    }

    let zip_data = build_export_zip(
        &ComplaintExport {
            complaint: &complaint,
            exported_at: Utc::now(),
            exported_by: user.id,
        },
        &files,
    )?;

    tracing::info!("User {} exported complaint {}", user.id, complaint.reference);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", complaint.reference),
        )
        .body(Body::from(zip_data))
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))
}
