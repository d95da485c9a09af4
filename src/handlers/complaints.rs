//! Complaint handlers for citizens and tier administrators

use crate::db::complaints::{self as repo, ComplaintScope, Unit};
use crate::db::organizations;
use crate::error::{AppError, AppResult};
use crate::handlers::auth::{enforce_rate_limit, get_client_ip, MAX_SUBMISSION_ATTEMPTS};
use crate::lifecycle::{self, Actor, CommentAuthor, ComplaintDraft};
use crate::models::*;
use crate::validation::{
    detect_mime_type, sanitize_filename, validate_attachment, ValidationError,
    MAX_SUPPORTING_DOCUMENTS,
};
use axum::{
    extract::{ConnectInfo, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

use super::AppState;

// =============================================================================
// Submission
// =============================================================================

/// Text part of the complaint form
#[derive(Debug, Default)]
struct ComplaintForm {
    title: String,
    description: String,
    service: String,
    priority: Option<String>,
    organization_id: Option<String>,
    district_id: Option<String>,
    sector_id: Option<String>,
    escalate_to_district: Option<String>,
    escalate_to_org: Option<String>,
    escalation_reason: Option<String>,
}

struct UploadedFile {
    filename: String,
    data: Vec<u8>,
}

/// Submit a complaint (multipart form; `documents` files, identity document first)
pub async fn create_complaint(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    if user.role != UserRole::Citizen {
        return Err(AppError::Forbidden(
            "Only citizens can submit complaints".to_string(),
        ));
    }

    let client_ip = get_client_ip(&headers, peer.map(|c| c.0), &state.trusted_proxies);
    enforce_rate_limit(&state.pool, &client_ip, "submit_complaint", MAX_SUBMISSION_ATTEMPTS)
        .await?;

    let mut form = ComplaintForm::default();
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Multipart parsing error: {}", e);
        AppError::BadRequest(format!("Failed to read upload: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "documents" {
            if files.len() > MAX_SUPPORTING_DOCUMENTS {
                return Err(ValidationError::TooManyAttachments {
                    max: MAX_SUPPORTING_DOCUMENTS,
                }
                .into());
            }
            let filename = field.file_name().unwrap_or("document").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read uploaded file: {}", e)))?;
            files.push(UploadedFile {
                filename,
                data: data.to_vec(),
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid form field '{}': {}", name, e)))?;
        match name.as_str() {
            "title" => form.title = value,
            "description" => form.description = value,
            "service" => form.service = value,
            "priority" => form.priority = Some(value),
            "organizationId" => form.organization_id = Some(value),
            "districtId" => form.district_id = Some(value),
            "sectorId" => form.sector_id = Some(value),
            "escalateToDistrict" => form.escalate_to_district = Some(value),
            "escalateToOrg" => form.escalate_to_org = Some(value),
            "escalationReason" => form.escalation_reason = Some(value),
            other => tracing::debug!("Ignoring unknown form field '{}'", other),
        }
    }

    if files.is_empty() {
        return Err(ValidationError::MissingIdentityDocument.into());
    }

    let now = Utc::now();
    let citizen_dir = state.upload_dir.join(user.id.to_string());
    let mut attachments = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let kind = if index == 0 {
            AttachmentKind::Identity
        } else {
            AttachmentKind::Supporting
        };
        let mime_type = validate_attachment(
            kind,
            &file.filename,
            detect_mime_type(&file.data),
            file.data.len(),
        )?;

        let id = Uuid::new_v4();
        let name = sanitize_filename(&file.filename);
        let storage_path = citizen_dir.join(format!("{}_{}", id, name));
        attachments.push(Attachment {
            id,
            kind,
            name,
            storage_path: storage_path.to_string_lossy().to_string(),
            mime_type: mime_type.to_string(),
            size: file.data.len() as i64,
            created_at: now,
        });
    }

    let draft = ComplaintDraft {
        title: form.title,
        description: form.description,
        service: form.service,
        priority: parse_priority(form.priority.as_deref())?,
        citizen_id: user.id,
        organization_id: parse_id("organizationId", form.organization_id.as_deref())?
            .ok_or_else(|| ValidationError::required("organizationId"))?,
        district_id: parse_id("districtId", form.district_id.as_deref())?,
        sector_id: parse_id("sectorId", form.sector_id.as_deref())?,
        escalate_to_district: parse_flag(form.escalate_to_district.as_deref()),
        escalate_to_org: parse_flag(form.escalate_to_org.as_deref()),
        escalation_reason: form.escalation_reason,
        attachments,
    };
    if !organizations::organization_exists(&state.pool, draft.organization_id).await? {
        return Err(ValidationError::invalid("organizationId", "unknown organization").into());
    }
    let complaint = lifecycle::submit(draft, &state.policy, now)?;

    fs::create_dir_all(&citizen_dir).await.map_err(|e| {
        tracing::error!("Failed to create upload directory {:?}: {}", citizen_dir, e);
        e
    })?;

    let mut written: Vec<PathBuf> = Vec::new();
    let stored = store_submission(&state, &complaint, &files, &mut written).await;
    if let Err(e) = stored {
        for path in &written {
            if let Err(cleanup_err) = fs::remove_file(path).await {
                tracing::warn!("Failed to clean up orphaned file {:?}: {}", path, cleanup_err);
            }
        }
        return Err(e);
    }

    tracing::info!(
        "Complaint {} submitted by {} at {} level",
        complaint.reference,
        user.id,
        complaint.escalation_level
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(complaint))))
}

/// Write the uploaded files, then the database rows
async fn store_submission(
    state: &AppState,
    complaint: &Complaint,
    files: &[UploadedFile],
    written: &mut Vec<PathBuf>,
) -> AppResult<()> {
    for (attachment, file) in complaint.attachments.iter().zip(files) {
        let path = PathBuf::from(&attachment.storage_path);
        if !path.starts_with(&state.upload_dir) {
            tracing::error!("Attachment path {:?} escapes the upload directory", path);
            return Err(ValidationError::invalid("documents", "invalid file name").into());
        }
        fs::write(&path, &file.data).await?;
        written.push(path);
    }
    repo::insert_complaint(&state.pool, complaint).await
}

fn parse_id(field: &str, value: Option<&str>) -> Result<Option<Uuid>, ValidationError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => Uuid::parse_str(v)
            .map(Some)
            .map_err(|_| ValidationError::invalid(field, "not a valid id")),
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "on" | "yes")
    )
}

fn parse_priority(value: Option<&str>) -> Result<ComplaintPriority, ValidationError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(ComplaintPriority::default()),
        Some("low") => Ok(ComplaintPriority::Low),
        Some("medium") => Ok(ComplaintPriority::Medium),
        Some("high") => Ok(ComplaintPriority::High),
        Some(_) => Err(ValidationError::invalid("priority", "must be low, medium or high")),
    }
}

/// Configured service catalog
pub async fn list_services(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ApiResponse::success(state.policy.service_catalog.clone())),
    )
}

// =============================================================================
// Listings
// =============================================================================

/// Complaints submitted by the current citizen
pub async fn list_citizen_complaints(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListComplaintsQuery>,
) -> AppResult<impl IntoResponse> {
    if user.role != UserRole::Citizen {
        return Err(AppError::Forbidden("Citizen access only".to_string()));
    }
    list_page(&state, ComplaintScope::Citizen(user.id), query).await
}

/// Queue of complaints owned by the current sector administrator
pub async fn list_sector_complaints(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListComplaintsQuery>,
) -> AppResult<impl IntoResponse> {
    let scope = queue_scope(&user, UserRole::Sectoradmin)?;
    list_page(&state, scope, query).await
}

/// Queue of complaints owned by the current district administrator
pub async fn list_district_complaints(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListComplaintsQuery>,
) -> AppResult<impl IntoResponse> {
    let scope = queue_scope(&user, UserRole::Districtadmin)?;
    list_page(&state, scope, query).await
}

/// Queue of complaints owned by the current organization administrator
pub async fn list_organization_complaints(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListComplaintsQuery>,
) -> AppResult<impl IntoResponse> {
    let scope = queue_scope(&user, UserRole::Orgadmin)?;
    list_page(&state, scope, query).await
}

fn queue_scope(user: &User, role: UserRole) -> AppResult<ComplaintScope> {
    match Unit::of(user) {
        Some(unit) if user.role == role => Ok(ComplaintScope::Queue(unit)),
        _ => Err(AppError::Forbidden(format!(
            "This queue is only available to {:?} accounts",
            role
        ))),
    }
}

async fn list_page(
    state: &AppState,
    scope: ComplaintScope,
    query: ListComplaintsQuery,
) -> AppResult<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    let (items, total) = repo::list_complaints(&state.pool, scope, query.status, page, per_page).await?;
    let total_pages = (total + per_page - 1) / per_page;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(PaginatedResponse {
            items,
            total,
            page,
            per_page,
            total_pages,
        })),
    ))
}

// =============================================================================
// Single complaint
// =============================================================================

/// Load a complaint the user may see
pub(crate) async fn load_visible(state: &AppState, user: &User, id: Uuid) -> AppResult<Complaint> {
    let complaint = repo::load_complaint(&state.pool, id).await?;
    if !lifecycle::can_view(&Actor::from(user), &complaint) {
        return Err(AppError::Forbidden(
            "You do not have access to this complaint".to_string(),
        ));
    }
    Ok(complaint)
}

pub async fn get_complaint(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let complaint = load_visible(&state, &user, id).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(complaint))))
}

/// Change the status of a complaint
pub async fn update_complaint_status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateStatusRequest>,
) -> AppResult<impl IntoResponse> {
    let before = load_visible(&state, &user, id).await?;
    let actor = Actor::from(&user);

    let after = lifecycle::transition(
        &before,
        input.status,
        &actor,
        input.message.as_deref(),
        Utc::now(),
    )?;
    let saved = repo::persist_changes(&state.pool, &before, after).await?;

    tracing::info!(
        "Complaint {} moved {} -> {} by {}",
        saved.reference,
        before.status,
        saved.status,
        user.id
    );

    Ok((StatusCode::OK, Json(ApiResponse::success(saved))))
}

/// Escalate a complaint one tier up
pub async fn escalate_complaint(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(input): Json<EscalateRequest>,
) -> AppResult<impl IntoResponse> {
    let before = load_visible(&state, &user, id).await?;
    let actor = Actor::from(&user);

    let after = lifecycle::escalate(&before, &actor, &input.reason, Utc::now())?;
    let saved = repo::persist_changes(&state.pool, &before, after).await?;

    tracing::info!(
        "Complaint {} escalated {} -> {} by {}",
        saved.reference,
        before.escalation_level,
        saved.escalation_level,
        user.id
    );

    Ok((StatusCode::OK, Json(ApiResponse::success(saved))))
}

/// Add a comment to a complaint
pub async fn add_complaint_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Json(input): Json<AddCommentRequest>,
) -> AppResult<impl IntoResponse> {
    let before = load_visible(&state, &user, id).await?;
    let author = CommentAuthor::for_actor(&Actor::from(&user)).ok_or_else(|| {
        AppError::Forbidden("This account cannot comment on complaints".to_string())
    })?;

    let after = lifecycle::add_comment(&before, &author, &input.text, input.attachments, Utc::now())?;
    let saved = repo::persist_changes(&state.pool, &before, after).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(saved))))
}
