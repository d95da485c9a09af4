//! Complaint repository
//!
//! A complaint is one `complaints` row plus four append-only child tables.
//! Writes go through [`persist_changes`], which bumps `version` with a
//! compare-and-set and appends the new child records in the same transaction.

use crate::db::ConstraintViolation;
use crate::error::{AppError, AppResult};
use crate::lifecycle;
use crate::models::{
    Attachment, Comment, Complaint, ComplaintRow, ComplaintStatus, ComplaintSummary,
    DashboardStats, EscalationDetail, EscalationLevel, TimelineEntry, User,
};
use crate::validation::ValidationError;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

/// An administrator's unit: their tier, organization and the sector,
/// district or organization id at that tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub level: EscalationLevel,
    pub organization_id: Uuid,
    pub id: Uuid,
}

impl Unit {
    /// The unit an administrator account is placed in
    pub fn of(user: &User) -> Option<Self> {
        let level = user.role.tier()?;
        let organization_id = user.organization_id?;
        let id = match level {
            EscalationLevel::Sector => user.sector_id?,
            EscalationLevel::District => user.district_id?,
            EscalationLevel::Organization => organization_id,
        };
        Some(Self {
            level,
            organization_id,
            id,
        })
    }
}

/// Which complaints a listing or statistic covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintScope {
    /// Complaints submitted by a citizen
    Citizen(Uuid),
    /// Complaints currently owned by the given unit
    Queue(Unit),
    /// Everything located in a unit
    Jurisdiction(Unit),
    All,
}

/// Tenant restriction shared by every scope, using `$1`
const ORGANIZATION_FILTER: &str = "($1::uuid IS NULL OR organization_id = $1)";

impl ComplaintScope {
    /// WHERE fragment using `$1` for the organization and `$2` for the scope id
    fn filter(&self) -> String {
        let unit = match self {
            ComplaintScope::Citizen(_) => "citizen_id = $2",
            ComplaintScope::Queue(unit) => match unit.level {
                EscalationLevel::Sector => "sector_id = $2 AND escalation_level = 'sector'",
                EscalationLevel::District => "district_id = $2 AND escalation_level = 'district'",
                EscalationLevel::Organization => {
                    "organization_id = $2 AND escalation_level = 'organization'"
                }
            },
            ComplaintScope::Jurisdiction(unit) => match unit.level {
                EscalationLevel::Sector => "sector_id = $2",
                EscalationLevel::District => "district_id = $2",
                EscalationLevel::Organization => "organization_id = $2",
            },
            ComplaintScope::All => "$2::uuid IS NULL",
        };
        format!("{} AND {}", ORGANIZATION_FILTER, unit)
    }

    fn organization_id(&self) -> Option<Uuid> {
        match self {
            ComplaintScope::Queue(unit) | ComplaintScope::Jurisdiction(unit) => {
                Some(unit.organization_id)
            }
            ComplaintScope::Citizen(_) | ComplaintScope::All => None,
        }
    }

    fn id(&self) -> Option<Uuid> {
        match self {
            ComplaintScope::Citizen(id) => Some(*id),
            ComplaintScope::Queue(unit) | ComplaintScope::Jurisdiction(unit) => Some(unit.id),
            ComplaintScope::All => None,
        }
    }
}

// =============================================================================
// Reads
// =============================================================================

/// Load a complaint with all child records, in insertion order.
pub async fn load_complaint(pool: &PgPool, id: Uuid) -> AppResult<Complaint> {
    let row = sqlx::query_as::<_, ComplaintRow>("SELECT * FROM complaints WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Complaint"))?;

    let attachments = sqlx::query_as::<_, Attachment>(
        r#"
        SELECT id, kind, name, storage_path, mime_type, size, created_at
        FROM complaint_attachments
        WHERE complaint_id = $1
        ORDER BY seq
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let comments = sqlx::query_as::<_, Comment>(
        r#"
        SELECT id, text, author_id, author_role, attachments, created_at
        FROM complaint_comments
        WHERE complaint_id = $1
        ORDER BY seq
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let escalations = sqlx::query_as::<_, EscalationDetail>(
        r#"
        SELECT id, from_level, to_level, reason, requested_by, requested_by_role,
               original_district_id, original_sector_id, created_at
        FROM escalation_details
        WHERE complaint_id = $1
        ORDER BY seq
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let timeline = sqlx::query_as::<_, TimelineEntry>(
        r#"
        SELECT id, action, actor_id, actor_role, detail, created_at
        FROM complaint_timeline
        WHERE complaint_id = $1
        ORDER BY seq
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let complaint = row.into_complaint(attachments, comments, escalations, timeline);
    lifecycle::check_routing(&complaint).map_err(|e| {
        tracing::error!("Stored complaint {} is inconsistent: {}", complaint.id, e);
        e
    })?;

    Ok(complaint)
}

/// One page of complaint summaries, newest first, with the total match count.
pub async fn list_complaints(
    pool: &PgPool,
    scope: ComplaintScope,
    status: Option<ComplaintStatus>,
    page: i64,
    per_page: i64,
) -> AppResult<(Vec<ComplaintSummary>, i64)> {
    let filter = scope.filter();
    let offset = page_offset(page, per_page)?;

    let items = sqlx::query_as::<_, ComplaintSummary>(&format!(
        r#"
        SELECT id, reference, title, service, priority, status, escalation_level,
               organization_id, district_id, sector_id, created_at, updated_at, due_date
        FROM complaints
        WHERE {} AND ($3::complaint_status IS NULL OR status = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
        filter
    ))
    .bind(scope.organization_id())
    .bind(scope.id())
    .bind(status)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM complaints WHERE {} AND ($3::complaint_status IS NULL OR status = $3)",
        filter
    ))
    .bind(scope.organization_id())
    .bind(scope.id())
    .bind(status)
    .fetch_one(pool)
    .await?;

    Ok((items, total))
}

/// Row offset of a 1-based page
fn page_offset(page: i64, per_page: i64) -> AppResult<i64> {
    page.checked_sub(1)
        .and_then(|p| p.checked_mul(per_page))
        .filter(|offset| *offset >= 0)
        .ok_or_else(|| AppError::BadRequest("page out of range".to_string()))
}

/// Status and tier counts for the dashboard
pub async fn dashboard_stats(pool: &PgPool, scope: ComplaintScope) -> AppResult<DashboardStats> {
    let filter = scope.filter();

    let by_status: Vec<(ComplaintStatus, i64)> = sqlx::query_as(&format!(
        "SELECT status, COUNT(*) FROM complaints WHERE {} GROUP BY status",
        filter
    ))
    .bind(scope.organization_id())
    .bind(scope.id())
    .fetch_all(pool)
    .await?;

    let by_level: Vec<(EscalationLevel, i64)> = sqlx::query_as(&format!(
        "SELECT escalation_level, COUNT(*) FROM complaints WHERE {} GROUP BY escalation_level",
        filter
    ))
    .bind(scope.organization_id())
    .bind(scope.id())
    .fetch_all(pool)
    .await?;

    let overdue: i64 = sqlx::query_scalar(&format!(
        r#"
        SELECT COUNT(*) FROM complaints
        WHERE {} AND due_date < NOW() AND status NOT IN ('resolved', 'rejected')
        "#,
        filter
    ))
    .bind(scope.organization_id())
    .bind(scope.id())
    .fetch_one(pool)
    .await?;

    Ok(summarize(by_status, by_level, overdue))
}

fn summarize(
    by_status: Vec<(ComplaintStatus, i64)>,
    by_level: Vec<(EscalationLevel, i64)>,
    overdue: i64,
) -> DashboardStats {
    // Every status is reported, including empty ones
    let mut status_counts: HashMap<String, i64> = ComplaintStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, count) in &by_status {
        status_counts.insert(status.as_str().to_string(), *count);
    }

    let total: i64 = by_status.iter().map(|(_, c)| c).sum();
    let resolved = status_counts
        .get(ComplaintStatus::Resolved.as_str())
        .copied()
        .unwrap_or(0);
    let resolution_rate = if total > 0 { resolved * 100 / total } else { 0 };

    DashboardStats {
        total,
        by_status: status_counts,
        by_level: by_level
            .into_iter()
            .map(|(level, count)| (level.as_str().to_string(), count))
            .collect(),
        overdue,
        resolution_rate,
    }
}

// =============================================================================
// Writes
// =============================================================================

/// Store a freshly submitted complaint.
pub async fn insert_complaint(pool: &PgPool, complaint: &Complaint) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO complaints (
            id, reference, title, description, service, priority, citizen_id,
            organization_id, district_id, sector_id, status, escalation_level,
            escalate_to_district, escalate_to_org, escalation_reason,
            created_at, updated_at, due_date, resolved_at, resolution, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21)
        "#,
    )
    .bind(complaint.id)
    .bind(&complaint.reference)
    .bind(&complaint.title)
    .bind(&complaint.description)
    .bind(&complaint.service)
    .bind(complaint.priority)
    .bind(complaint.citizen_id)
    .bind(complaint.organization_id)
    .bind(complaint.district_id)
    .bind(complaint.sector_id)
    .bind(complaint.status)
    .bind(complaint.escalation_level)
    .bind(complaint.escalate_to_district)
    .bind(complaint.escalate_to_org)
    .bind(&complaint.escalation_reason)
    .bind(complaint.created_at)
    .bind(complaint.updated_at)
    .bind(complaint.due_date)
    .bind(complaint.resolved_at)
    .bind(&complaint.resolution)
    .bind(complaint.version)
    .execute(&mut *tx)
    .await
    .map_err(|e| insert_complaint_error(complaint, e))?;

    append_children(&mut tx, complaint, ChildCounts::default()).await?;
    tx.commit().await?;

    Ok(())
}

/// A reference clash is a retryable conflict; a missing organization or
/// citizen is bad input.
fn insert_complaint_error(complaint: &Complaint, e: sqlx::Error) -> AppError {
    match ConstraintViolation::of(&e) {
        Some(ConstraintViolation::Unique) => {
            tracing::warn!("Complaint reference {} already taken", complaint.reference);
            AppError::Conflict
        }
        Some(ConstraintViolation::ForeignKey) => {
            ValidationError::invalid("organizationId", "unknown organization").into()
        }
        None => e.into(),
    }
}

/// Write the result of a lifecycle operation.
///
/// `before` is the state the operation started from. The update only applies
/// if the stored version still equals `before.version`; otherwise nothing is
/// written and [`AppError::Conflict`] is returned.
pub async fn persist_changes(
    pool: &PgPool,
    before: &Complaint,
    after: Complaint,
) -> AppResult<Complaint> {
    let mut tx = pool.begin().await?;

    let new_version: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE complaints SET
            status = $3,
            escalation_level = $4,
            escalate_to_district = $5,
            escalate_to_org = $6,
            escalation_reason = $7,
            district_id = $8,
            sector_id = $9,
            updated_at = $10,
            resolved_at = $11,
            resolution = $12,
            version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING version
        "#,
    )
    .bind(before.id)
    .bind(before.version)
    .bind(after.status)
    .bind(after.escalation_level)
    .bind(after.escalate_to_district)
    .bind(after.escalate_to_org)
    .bind(&after.escalation_reason)
    .bind(after.district_id)
    .bind(after.sector_id)
    .bind(after.updated_at)
    .bind(after.resolved_at)
    .bind(&after.resolution)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(version) = new_version else {
        tracing::warn!(
            "Version conflict on complaint {} (expected version {})",
            before.reference,
            before.version
        );
        return Err(AppError::Conflict);
    };

    append_children(&mut tx, &after, ChildCounts::of(before)).await?;
    tx.commit().await?;

    Ok(Complaint { version, ..after })
}

/// Number of child records already stored
#[derive(Debug, Default, Clone, Copy)]
struct ChildCounts {
    attachments: usize,
    comments: usize,
    escalations: usize,
    timeline: usize,
}

impl ChildCounts {
    fn of(complaint: &Complaint) -> Self {
        Self {
            attachments: complaint.attachments.len(),
            comments: complaint.comments.len(),
            escalations: complaint.escalations.len(),
            timeline: complaint.timeline.len(),
        }
    }
}

async fn append_children(
    tx: &mut Transaction<'_, Postgres>,
    complaint: &Complaint,
    stored: ChildCounts,
) -> Result<(), sqlx::Error> {
    for (seq, attachment) in complaint.attachments.iter().enumerate().skip(stored.attachments) {
        sqlx::query(
            r#"
            INSERT INTO complaint_attachments
                (id, complaint_id, seq, kind, name, storage_path, mime_type, size, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attachment.id)
        .bind(complaint.id)
        .bind(seq as i32)
        .bind(attachment.kind)
        .bind(&attachment.name)
        .bind(&attachment.storage_path)
        .bind(&attachment.mime_type)
        .bind(attachment.size)
        .bind(attachment.created_at)
        .execute(&mut **tx)
        .await?;
    }

    for (seq, comment) in complaint.comments.iter().enumerate().skip(stored.comments) {
        sqlx::query(
            r#"
            INSERT INTO complaint_comments
                (id, complaint_id, seq, text, author_id, author_role, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(comment.id)
        .bind(complaint.id)
        .bind(seq as i32)
        .bind(&comment.text)
        .bind(comment.author_id)
        .bind(comment.author_role)
        .bind(&comment.attachments)
        .bind(comment.created_at)
        .execute(&mut **tx)
        .await?;
    }

    for (seq, detail) in complaint.escalations.iter().enumerate().skip(stored.escalations) {
        sqlx::query(
            r#"
            INSERT INTO escalation_details
                (id, complaint_id, seq, from_level, to_level, reason, requested_by,
                 requested_by_role, original_district_id, original_sector_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(detail.id)
        .bind(complaint.id)
        .bind(seq as i32)
        .bind(detail.from_level)
        .bind(detail.to_level)
        .bind(&detail.reason)
        .bind(detail.requested_by)
        .bind(detail.requested_by_role)
        .bind(detail.original_district_id)
        .bind(detail.original_sector_id)
        .bind(detail.created_at)
        .execute(&mut **tx)
        .await?;
    }

    for (seq, entry) in complaint.timeline.iter().enumerate().skip(stored.timeline) {
        sqlx::query(
            r#"
            INSERT INTO complaint_timeline
                (id, complaint_id, seq, action, actor_id, actor_role, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(complaint.id)
        .bind(seq as i32)
        .bind(entry.action)
        .bind(entry.actor_id)
        .bind(entry.actor_role)
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
