//! Complaint lifecycle engine
//!
//! Owns the status and escalation state machine of a complaint. Every
//! operation takes the current complaint by reference and returns an updated
//! copy, so a refused operation leaves the caller's value untouched. The
//! engine performs no I/O: persistence and optimistic concurrency belong to
//! the caller (see `db::complaints`).
//!
//! Routing: a complaint is owned by exactly one tier. Sector-level
//! complaints carry both a district and a sector, district-level complaints
//! only a district, organization-level complaints neither.

pub mod access;

pub use access::{can_view, Actor};

use crate::models::{
    Attachment, AttachmentKind, Comment, CommentRole, Complaint, ComplaintPriority,
    ComplaintStatus, EscalationDetail, EscalationLevel, TimelineAction, TimelineEntry, UserRole,
};
use crate::validation::{validate_text, ValidationError, MAX_SUPPORTING_DOCUMENTS};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 10_000;
const MAX_REASON_LEN: usize = 2_000;
const MAX_COMMENT_LEN: usize = 5_000;
/// Hex digits of the complaint id carried in its reference
const REFERENCE_SUFFIX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid state change: {0}")]
    InvariantViolation(String),
}

/// Configuration-owned inputs to the engine
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Closed list of complaint categories
    pub service_catalog: Vec<String>,
    /// Days until a new complaint is due; no due date when unset
    pub response_days: Option<i64>,
}

impl LifecyclePolicy {
    pub fn offers(&self, service: &str) -> bool {
        self.service_catalog.iter().any(|s| s == service)
    }
}

/// A complaint as submitted by a citizen, before validation
#[derive(Debug, Clone)]
pub struct ComplaintDraft {
    pub title: String,
    pub description: String,
    pub service: String,
    pub priority: ComplaintPriority,
    pub citizen_id: Uuid,
    pub organization_id: Uuid,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub escalate_to_district: bool,
    pub escalate_to_org: bool,
    pub escalation_reason: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Author of a comment as recorded on the complaint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentAuthor {
    pub user_id: Uuid,
    pub role: CommentRole,
}

impl CommentAuthor {
    /// Superadmins do not take part in complaint conversations.
    pub fn for_actor(actor: &Actor) -> Option<Self> {
        actor.role.comment_role().map(|role| Self {
            user_id: actor.user_id,
            role,
        })
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Validate a draft and turn it into a new complaint in `received` status.
pub fn submit(
    draft: ComplaintDraft,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> Result<Complaint, LifecycleError> {
    validate_text("title", &draft.title, MAX_TITLE_LEN)?;
    validate_text("description", &draft.description, MAX_DESCRIPTION_LEN)?;

    let service = draft.service.trim();
    if service.is_empty() {
        return Err(ValidationError::required("service").into());
    }
    if !policy.offers(service) {
        return Err(ValidationError::UnknownService {
            service: service.to_string(),
        }
        .into());
    }
    if draft.organization_id.is_nil() {
        return Err(ValidationError::required("organization").into());
    }
    if draft.citizen_id.is_nil() {
        return Err(ValidationError::required("citizen").into());
    }

    if !draft
        .attachments
        .iter()
        .any(|a| a.kind == AttachmentKind::Identity)
    {
        return Err(ValidationError::MissingIdentityDocument.into());
    }
    let supporting = draft
        .attachments
        .iter()
        .filter(|a| a.kind == AttachmentKind::Supporting)
        .count();
    if supporting > MAX_SUPPORTING_DOCUMENTS {
        return Err(ValidationError::TooManyAttachments {
            max: MAX_SUPPORTING_DOCUMENTS,
        }
        .into());
    }

    let level = route_draft(&draft)?;
    let escalation_reason = draft
        .escalation_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    match (level, escalation_reason) {
        (EscalationLevel::Sector, Some(_)) => {
            return Err(ValidationError::invalid(
                "escalation_reason",
                "only allowed when escalating",
            )
            .into());
        }
        (EscalationLevel::District | EscalationLevel::Organization, None) => {
            return Err(ValidationError::required("escalation_reason").into());
        }
        (_, Some(reason)) if reason.chars().count() > MAX_REASON_LEN => {
            return Err(ValidationError::TooLong {
                field: "escalation_reason".to_string(),
                max: MAX_REASON_LEN,
            }
            .into());
        }
        _ => {}
    }

    let (escalate_to_district, escalate_to_org) = level.flags();
    let id = Uuid::new_v4();

    Ok(Complaint {
        id,
        reference: reference_for(id, now),
        title: draft.title.trim().to_string(),
        description: draft.description.trim().to_string(),
        service: service.to_string(),
        priority: draft.priority,
        citizen_id: draft.citizen_id,
        organization_id: draft.organization_id,
        district_id: draft.district_id,
        sector_id: draft.sector_id,
        status: ComplaintStatus::Received,
        escalation_level: level,
        escalate_to_district,
        escalate_to_org,
        escalation_reason: escalation_reason.map(str::to_string),
        attachments: draft.attachments,
        comments: Vec::new(),
        escalations: Vec::new(),
        timeline: vec![timeline_entry(
            TimelineAction::Submitted,
            draft.citizen_id,
            UserRole::Citizen,
            Some(format!("submitted at {} level", level)),
            now,
        )],
        created_at: now,
        updated_at: now,
        due_date: policy.response_days.map(|days| now + Duration::days(days)),
        resolved_at: None,
        resolution: None,
        version: 0,
    })
}

/// Change the status of a complaint on behalf of an owning-tier administrator.
/// `CMP-YYYYMMDD-` followed by the leading hex digits of the complaint id
fn reference_for(id: Uuid, now: DateTime<Utc>) -> String {
    let hex = id.simple().to_string();
    format!(
        "CMP-{}-{}",
        now.format("%Y%m%d"),
        &hex[..REFERENCE_SUFFIX_LEN]
    )
}

pub fn transition(
    complaint: &Complaint,
    new_status: ComplaintStatus,
    actor: &Actor,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Complaint, LifecycleError> {
    access::authorize_status_change(actor, complaint)?;

    if !can_transition(complaint.status, new_status) {
        return Err(LifecycleError::InvariantViolation(format!(
            "cannot move a complaint from {} to {}",
            complaint.status, new_status
        )));
    }

    let comment = comment.map(str::trim).filter(|c| !c.is_empty());
    if new_status.requires_comment() && comment.is_none() {
        return Err(ValidationError::required("message").into());
    }
    if let Some(text) = comment {
        if text.chars().count() > MAX_COMMENT_LEN {
            return Err(ValidationError::TooLong {
                field: "message".to_string(),
                max: MAX_COMMENT_LEN,
            }
            .into());
        }
    }
    let author = CommentAuthor::for_actor(actor).ok_or_else(|| {
        LifecycleError::Authorization("actor cannot author complaint messages".into())
    })?;

    let mut updated = complaint.clone();
    if let Some(text) = comment {
        updated.comments.push(new_comment(&author, text, Vec::new(), now));
    }
    if new_status == ComplaintStatus::Resolved {
        updated.resolved_at = Some(now);
        updated.resolution = comment.map(str::to_string);
    }
    updated.status = new_status;
    updated.updated_at = now;
    updated.timeline.push(timeline_entry(
        TimelineAction::StatusChanged,
        actor.user_id,
        actor.role,
        Some(format!("{} -> {}", complaint.status, new_status)),
        now,
    ));

    Ok(updated)
}

/// Promote the owning tier by exactly one level. Status is left as is.
pub fn escalate(
    complaint: &Complaint,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Complaint, LifecycleError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::required("reason").into());
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        }
        .into());
    }

    let from = complaint.escalation_level;
    let target = from.next().ok_or_else(|| {
        LifecycleError::InvariantViolation(
            "complaint is already at the organization level".into(),
        )
    })?;
    if complaint.status.is_terminal() {
        return Err(LifecycleError::InvariantViolation(format!(
            "cannot escalate a {} complaint",
            complaint.status
        )));
    }

    access::authorize_escalation(actor, complaint)?;
    let requester = CommentAuthor::for_actor(actor).ok_or_else(|| {
        LifecycleError::Authorization("actor cannot request escalation".into())
    })?;

    let mut updated = complaint.clone();
    updated.escalations.push(EscalationDetail {
        id: Uuid::new_v4(),
        from_level: from,
        to_level: target,
        reason: reason.to_string(),
        requested_by: requester.user_id,
        requested_by_role: requester.role,
        original_district_id: complaint.district_id,
        original_sector_id: complaint.sector_id,
        created_at: now,
    });

    let (escalate_to_district, escalate_to_org) = target.flags();
    updated.escalation_level = target;
    updated.escalate_to_district = escalate_to_district;
    updated.escalate_to_org = escalate_to_org;
    updated.escalation_reason = Some(reason.to_string());
    updated.sector_id = None;
    if target == EscalationLevel::Organization {
        updated.district_id = None;
    }
    updated.updated_at = now;
    updated.timeline.push(timeline_entry(
        TimelineAction::Escalated,
        actor.user_id,
        actor.role,
        Some(format!("{} -> {}: {}", from, target, reason)),
        now,
    ));

    Ok(updated)
}

/// Append a comment. Comments are never deduplicated.
pub fn add_comment(
    complaint: &Complaint,
    author: &CommentAuthor,
    text: &str,
    attachments: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Complaint, LifecycleError> {
    let text = text.trim();
    let attachments: Vec<String> = attachments
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if text.is_empty() && attachments.is_empty() {
        return Err(ValidationError::required("text").into());
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::TooLong {
            field: "text".to_string(),
            max: MAX_COMMENT_LEN,
        }
        .into());
    }

    let mut updated = complaint.clone();
    updated.comments.push(new_comment(author, text, attachments, now));
    updated.updated_at = now;
    updated.timeline.push(timeline_entry(
        TimelineAction::Commented,
        author.user_id,
        author.role.user_role(),
        None,
        now,
    ));

    Ok(updated)
}

// =============================================================================
// Invariants
// =============================================================================

/// Legal status edges. Terminal statuses have none, and a complaint only
/// returns to `received` after an escalation.
pub fn can_transition(from: ComplaintStatus, to: ComplaintStatus) -> bool {
    if from == to || from.is_terminal() {
        return false;
    }
    match to {
        ComplaintStatus::Received => from == ComplaintStatus::Escalated,
        ComplaintStatus::InProgress
        | ComplaintStatus::NeedsInfo
        | ComplaintStatus::Resolved
        | ComplaintStatus::Rejected
        | ComplaintStatus::Escalated => true,
    }
}

/// Verify that the stored routing fields agree with the escalation level.
pub fn check_routing(complaint: &Complaint) -> Result<(), LifecycleError> {
    let level = complaint.escalation_level;
    let violation = |detail: &str| {
        Err(LifecycleError::InvariantViolation(format!(
            "complaint {} at {} level {}",
            complaint.reference, level, detail
        )))
    };

    if (complaint.escalate_to_district, complaint.escalate_to_org) != level.flags() {
        return violation("has inconsistent escalation flags");
    }
    let has_location = match level {
        EscalationLevel::Sector => complaint.district_id.is_some() && complaint.sector_id.is_some(),
        EscalationLevel::District => complaint.district_id.is_some() && complaint.sector_id.is_none(),
        EscalationLevel::Organization => {
            complaint.district_id.is_none() && complaint.sector_id.is_none()
        }
    };
    if !has_location {
        return violation("has an inconsistent district/sector assignment");
    }
    let has_reason = complaint
        .escalation_reason
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    if has_reason != (level != EscalationLevel::Sector) {
        return violation("has an inconsistent escalation reason");
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn route_draft(draft: &ComplaintDraft) -> Result<EscalationLevel, ValidationError> {
    let level = if draft.escalate_to_org {
        EscalationLevel::Organization
    } else if draft.escalate_to_district {
        EscalationLevel::District
    } else {
        EscalationLevel::Sector
    };

    let must_be_empty = |field: &str| {
        ValidationError::invalid(field, format!("must be empty for a {}-level complaint", level))
    };
    match level {
        EscalationLevel::Organization => {
            if draft.district_id.is_some() {
                return Err(must_be_empty("district"));
            }
            if draft.sector_id.is_some() {
                return Err(must_be_empty("sector"));
            }
        }
        EscalationLevel::District => {
            if draft.district_id.is_none() {
                return Err(ValidationError::required("district"));
            }
            if draft.sector_id.is_some() {
                return Err(must_be_empty("sector"));
            }
        }
        EscalationLevel::Sector => {
            if draft.district_id.is_none() {
                return Err(ValidationError::required("district"));
            }
            if draft.sector_id.is_none() {
                return Err(ValidationError::required("sector"));
            }
        }
    }
    Ok(level)
}

fn new_comment(
    author: &CommentAuthor,
    text: &str,
    attachments: Vec<String>,
    now: DateTime<Utc>,
) -> Comment {
    Comment {
        id: Uuid::new_v4(),
        text: text.to_string(),
        author_id: author.user_id,
        author_role: author.role,
        attachments,
        created_at: now,
    }
}

fn timeline_entry(
    action: TimelineAction,
    actor_id: Uuid,
    actor_role: UserRole,
    detail: Option<String>,
    now: DateTime<Utc>,
) -> TimelineEntry {
    TimelineEntry {
        id: Uuid::new_v4(),
        action,
        actor_id,
        actor_role,
        detail,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        organization: Uuid,
        district: Uuid,
        sector: Uuid,
        citizen: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                organization: Uuid::new_v4(),
                district: Uuid::new_v4(),
                sector: Uuid::new_v4(),
                citizen: Uuid::new_v4(),
            }
        }

        fn draft(&self) -> ComplaintDraft {
            ComplaintDraft {
                title: "No water since Monday".to_string(),
                description: "The public tap in Kacyiru has been dry for four days.".to_string(),
                service: "Water Supply".to_string(),
                priority: ComplaintPriority::High,
                citizen_id: self.citizen,
                organization_id: self.organization,
                district_id: Some(self.district),
                sector_id: Some(self.sector),
                escalate_to_district: false,
                escalate_to_org: false,
                escalation_reason: None,
                attachments: vec![attachment(AttachmentKind::Identity)],
            }
        }

        fn submitted(&self) -> Complaint {
            submit(self.draft(), &policy(), now()).expect("valid draft")
        }

        fn admin(&self, role: UserRole) -> Actor {
            Actor {
                user_id: Uuid::new_v4(),
                role,
                organization_id: Some(self.organization),
                district_id: matches!(role, UserRole::Districtadmin | UserRole::Sectoradmin)
                    .then_some(self.district),
                sector_id: (role == UserRole::Sectoradmin).then_some(self.sector),
            }
        }

        fn citizen(&self) -> Actor {
            Actor {
                user_id: self.citizen,
                role: UserRole::Citizen,
                organization_id: None,
                district_id: None,
                sector_id: None,
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    fn later(minutes: i64) -> DateTime<Utc> {
        now() + Duration::minutes(minutes)
    }

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy {
            service_catalog: vec![
                "Water Supply".to_string(),
                "Electricity".to_string(),
                "Road Maintenance".to_string(),
            ],
            response_days: Some(14),
        }
    }

    fn attachment(kind: AttachmentKind) -> Attachment {
        Attachment {
            id: Uuid::new_v4(),
            kind,
            name: "national-id.pdf".to_string(),
            storage_path: "uploads/national-id.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 2048,
            created_at: now(),
        }
    }

    fn validation_field(err: LifecycleError) -> String {
        match err {
            LifecycleError::Validation(e) => e.field().to_string(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // -------------------------------------------------------------------------
    // submit
    // -------------------------------------------------------------------------

    #[test]
    fn test_submit_sector_level_complaint() {
        let f = Fixture::new();
        let complaint = assert_ok!(submit(f.draft(), &policy(), now()));

        assert_eq!(complaint.status, ComplaintStatus::Received);
        assert_eq!(complaint.escalation_level, EscalationLevel::Sector);
        assert!(!complaint.escalate_to_district && !complaint.escalate_to_org);
        assert_eq!(complaint.district_id, Some(f.district));
        assert_eq!(complaint.sector_id, Some(f.sector));
        assert_eq!(complaint.due_date, Some(now() + Duration::days(14)));
        assert!(complaint.reference.starts_with("CMP-20240301-"));
        assert_eq!(complaint.timeline.len(), 1);
        assert_eq!(complaint.timeline[0].action, TimelineAction::Submitted);
        assert_eq!(complaint.version, 0);
        assert_ok!(check_routing(&complaint));
    }

    #[test]
    fn test_reference_carries_ten_hex_digits_of_the_id() {
        let id = Uuid::parse_str("3f2a9c1e-7b4d-4e21-9a0f-5c6d7e8f9a0b").unwrap();
        let reference = reference_for(id, now());
        assert_eq!(reference, "CMP-20240301-3f2a9c1e7b");
        assert_eq!(reference.len(), "CMP-20240301-".len() + REFERENCE_SUFFIX_LEN);

        let f = Fixture::new();
        let complaint = assert_ok!(submit(f.draft(), &policy(), now()));
        let suffix = complaint.reference.trim_start_matches("CMP-20240301-");
        assert_eq!(suffix.len(), REFERENCE_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_submit_without_response_window_has_no_due_date() {
        let f = Fixture::new();
        let policy = LifecyclePolicy {
            response_days: None,
            ..policy()
        };
        let complaint = assert_ok!(submit(f.draft(), &policy, now()));
        assert_eq!(complaint.due_date, None);
    }

    #[test]
    fn test_submit_requires_identity_document() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            attachments: vec![attachment(AttachmentKind::Supporting)],
            ..f.draft()
        };
        assert_eq!(
            submit(draft, &policy(), now()).unwrap_err(),
            LifecycleError::Validation(ValidationError::MissingIdentityDocument)
        );
    }

    #[test]
    fn test_submit_limits_supporting_documents() {
        let f = Fixture::new();
        let mut draft = f.draft();
        draft
            .attachments
            .extend((0..6).map(|_| attachment(AttachmentKind::Supporting)));
        assert!(matches!(
            submit(draft, &policy(), now()),
            Err(LifecycleError::Validation(ValidationError::TooManyAttachments { max: 5 }))
        ));
    }

    #[test]
    fn test_submit_requires_text_fields() {
        let f = Fixture::new();
        let no_title = ComplaintDraft {
            title: "  ".to_string(),
            ..f.draft()
        };
        assert_eq!(validation_field(submit(no_title, &policy(), now()).unwrap_err()), "title");

        let no_description = ComplaintDraft {
            description: String::new(),
            ..f.draft()
        };
        assert_eq!(
            validation_field(submit(no_description, &policy(), now()).unwrap_err()),
            "description"
        );
    }

    #[test]
    fn test_submit_rejects_unknown_service() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            service: "Space Program".to_string(),
            ..f.draft()
        };
        assert!(matches!(
            submit(draft, &policy(), now()),
            Err(LifecycleError::Validation(ValidationError::UnknownService { .. }))
        ));
    }

    #[test]
    fn test_submit_requires_organization() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            organization_id: Uuid::nil(),
            ..f.draft()
        };
        assert_eq!(
            validation_field(submit(draft, &policy(), now()).unwrap_err()),
            "organization"
        );
    }

    #[test]
    fn test_submit_escalated_to_org_without_reason_fails() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            escalate_to_org: true,
            district_id: None,
            sector_id: None,
            escalation_reason: Some("   ".to_string()),
            ..f.draft()
        };
        assert_eq!(
            validation_field(submit(draft, &policy(), now()).unwrap_err()),
            "escalation_reason"
        );
    }

    #[test]
    fn test_submit_escalated_to_org() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            escalate_to_org: true,
            escalate_to_district: true,
            district_id: None,
            sector_id: None,
            escalation_reason: Some("District office closed".to_string()),
            ..f.draft()
        };
        let complaint = assert_ok!(submit(draft, &policy(), now()));
        assert_eq!(complaint.escalation_level, EscalationLevel::Organization);
        assert_eq!(
            (complaint.escalate_to_district, complaint.escalate_to_org),
            (false, true)
        );
        assert_ok!(check_routing(&complaint));
    }

    #[test]
    fn test_submit_escalated_to_org_must_not_name_sector() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            escalate_to_org: true,
            district_id: None,
            escalation_reason: Some("Sector ignored me".to_string()),
            ..f.draft()
        };
        assert_eq!(validation_field(submit(draft, &policy(), now()).unwrap_err()), "sector");
    }

    #[test]
    fn test_submit_escalated_to_district() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            escalate_to_district: true,
            sector_id: None,
            escalation_reason: Some("Sector office unreachable".to_string()),
            ..f.draft()
        };
        let complaint = assert_ok!(submit(draft, &policy(), now()));
        assert_eq!(complaint.escalation_level, EscalationLevel::District);
        assert_eq!(complaint.sector_id, None);
        assert_eq!(complaint.district_id, Some(f.district));
    }

    #[test]
    fn test_submit_reason_without_escalation_fails() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            escalation_reason: Some("Just because".to_string()),
            ..f.draft()
        };
        assert_eq!(
            validation_field(submit(draft, &policy(), now()).unwrap_err()),
            "escalation_reason"
        );
    }

    #[test]
    fn test_submit_sector_level_requires_location() {
        let f = Fixture::new();
        let draft = ComplaintDraft {
            sector_id: None,
            ..f.draft()
        };
        assert_eq!(validation_field(submit(draft, &policy(), now()).unwrap_err()), "sector");
    }

    // -------------------------------------------------------------------------
    // transition
    // -------------------------------------------------------------------------

    #[test]
    fn test_owning_sector_admin_resolves_complaint() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let admin = f.admin(UserRole::Sectoradmin);

        let resolved = assert_ok!(transition(
            &complaint,
            ComplaintStatus::Resolved,
            &admin,
            Some("Pipe repaired"),
            later(5)
        ));
        assert_eq!(resolved.status, ComplaintStatus::Resolved);
        assert_eq!(resolved.resolved_at, Some(later(5)));
        assert_eq!(resolved.resolution.as_deref(), Some("Pipe repaired"));
        assert_eq!(resolved.comments.len(), 1);
        assert_eq!(resolved.comments[0].author_role, CommentRole::SectorAdmin);
        assert_eq!(resolved.timeline.last().unwrap().action, TimelineAction::StatusChanged);
        assert_eq!(resolved.updated_at, later(5));
    }

    #[test]
    fn test_resolve_without_comment_is_allowed() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let resolved = assert_ok!(transition(
            &complaint,
            ComplaintStatus::Resolved,
            &f.admin(UserRole::Sectoradmin),
            None,
            later(1)
        ));
        assert!(resolved.comments.is_empty());
        assert_eq!(resolved.resolution, None);
    }

    #[test]
    fn test_org_admin_cannot_transition_sector_complaint() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let err = assert_err!(transition(
            &complaint,
            ComplaintStatus::Resolved,
            &f.admin(UserRole::Orgadmin),
            None,
            later(1)
        ));
        assert!(matches!(err, LifecycleError::Authorization(_)));
    }

    #[test]
    fn test_sector_admin_of_other_sector_is_refused() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let outsider = Actor {
            sector_id: Some(Uuid::new_v4()),
            ..f.admin(UserRole::Sectoradmin)
        };
        assert!(matches!(
            transition(&complaint, ComplaintStatus::InProgress, &outsider, None, later(1)),
            Err(LifecycleError::Authorization(_))
        ));
    }

    #[test]
    fn test_citizen_cannot_change_status() {
        let f = Fixture::new();
        let complaint = f.submitted();
        assert!(matches!(
            transition(&complaint, ComplaintStatus::Resolved, &f.citizen(), None, later(1)),
            Err(LifecycleError::Authorization(_))
        ));
    }

    #[test]
    fn test_reject_and_needs_info_require_comment() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let admin = f.admin(UserRole::Sectoradmin);

        for status in [ComplaintStatus::Rejected, ComplaintStatus::NeedsInfo] {
            let err = assert_err!(transition(&complaint, status, &admin, Some("  "), later(1)));
            assert_eq!(validation_field(err), "message");
        }
        // Nothing was touched on the original
        assert_eq!(complaint.status, ComplaintStatus::Received);
        assert!(complaint.comments.is_empty());
        assert_eq!(complaint.timeline.len(), 1);
    }

    #[test]
    fn test_needs_info_round_trip() {
        let f = Fixture::new();
        let admin = f.admin(UserRole::Sectoradmin);
        let complaint = f.submitted();

        let asked = assert_ok!(transition(
            &complaint,
            ComplaintStatus::NeedsInfo,
            &admin,
            Some("Which street exactly?"),
            later(1)
        ));
        let answered = assert_ok!(add_comment(
            &asked,
            &CommentAuthor::for_actor(&f.citizen()).unwrap(),
            "KG 7 Ave, near the school",
            Vec::new(),
            later(2)
        ));
        assert_eq!(answered.status, ComplaintStatus::NeedsInfo);

        let resumed = assert_ok!(transition(
            &answered,
            ComplaintStatus::InProgress,
            &admin,
            None,
            later(3)
        ));
        assert_eq!(resumed.status, ComplaintStatus::InProgress);
        assert_eq!(resumed.comments.len(), 2);
        assert_eq!(resumed.timeline.len(), 4);
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        let f = Fixture::new();
        let admin = f.admin(UserRole::Sectoradmin);
        let rejected = assert_ok!(transition(
            &f.submitted(),
            ComplaintStatus::Rejected,
            &admin,
            Some("Duplicate of CMP-20240229-0a1b2"),
            later(1)
        ));
        let err = assert_err!(transition(
            &rejected,
            ComplaintStatus::InProgress,
            &admin,
            None,
            later(2)
        ));
        assert!(matches!(err, LifecycleError::InvariantViolation(_)));
    }

    #[test]
    fn test_transition_table() {
        use ComplaintStatus::*;
        assert!(can_transition(Received, InProgress));
        assert!(can_transition(Received, Resolved));
        assert!(can_transition(NeedsInfo, InProgress));
        assert!(can_transition(InProgress, Escalated));
        assert!(can_transition(Escalated, Received));
        assert!(!can_transition(InProgress, Received));
        assert!(!can_transition(Received, Received));
        for to in ComplaintStatus::ALL {
            assert!(!can_transition(Resolved, to));
            assert!(!can_transition(Rejected, to));
        }
    }

    // -------------------------------------------------------------------------
    // escalate
    // -------------------------------------------------------------------------

    #[test]
    fn test_district_admin_escalates_sector_complaint() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let district_admin = f.admin(UserRole::Districtadmin);

        let escalated = assert_ok!(escalate(
            &complaint,
            &district_admin,
            "sector unavailable",
            later(10)
        ));
        assert_eq!(escalated.escalation_level, EscalationLevel::District);
        assert_eq!(escalated.sector_id, None);
        assert_eq!(escalated.district_id, Some(f.district));
        assert_eq!(
            (escalated.escalate_to_district, escalated.escalate_to_org),
            (true, false)
        );
        assert_eq!(escalated.escalation_reason.as_deref(), Some("sector unavailable"));
        assert_eq!(escalated.status, ComplaintStatus::Received);

        let detail = escalated.escalations.last().unwrap();
        assert_eq!(detail.reason, "sector unavailable");
        assert_eq!(detail.from_level, EscalationLevel::Sector);
        assert_eq!(detail.to_level, EscalationLevel::District);
        assert_eq!(detail.requested_by, district_admin.user_id);
        assert_eq!(detail.requested_by_role, CommentRole::DistrictAdmin);
        assert_eq!(detail.original_sector_id, Some(f.sector));
        assert_eq!(detail.created_at, later(10));
        assert_ok!(check_routing(&escalated));
    }

    #[test]
    fn test_escalation_is_monotonic_and_stops_at_organization() {
        let f = Fixture::new();
        let citizen = f.citizen();
        let mut complaint = f.submitted();
        let mut seen = vec![complaint.escalation_level];

        for step in 1..=2 {
            complaint = assert_ok!(escalate(&complaint, &citizen, "no response", later(step)));
            assert_ok!(check_routing(&complaint));
            seen.push(complaint.escalation_level);
        }
        assert_eq!(
            seen,
            vec![
                EscalationLevel::Sector,
                EscalationLevel::District,
                EscalationLevel::Organization
            ]
        );
        assert_eq!(complaint.district_id, None);
        assert_eq!(complaint.escalations.len(), 2);

        let err = assert_err!(escalate(&complaint, &citizen, "still nothing", later(5)));
        assert!(matches!(err, LifecycleError::InvariantViolation(_)));
        assert_eq!(complaint.escalation_level, EscalationLevel::Organization);
    }

    #[test]
    fn test_escalate_requires_reason() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let err = assert_err!(escalate(&complaint, &f.citizen(), " ", later(1)));
        assert_eq!(validation_field(err), "reason");
        assert_eq!(complaint.escalation_level, EscalationLevel::Sector);
    }

    #[test]
    fn test_other_citizen_cannot_escalate() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let stranger = Actor {
            user_id: Uuid::new_v4(),
            ..f.citizen()
        };
        assert!(matches!(
            escalate(&complaint, &stranger, "I want to help", later(1)),
            Err(LifecycleError::Authorization(_))
        ));
    }

    #[test]
    fn test_sector_admin_cannot_escalate_district_complaint() {
        let f = Fixture::new();
        let at_district = assert_ok!(escalate(
            &f.submitted(),
            &f.admin(UserRole::Sectoradmin),
            "needs district budget",
            later(1)
        ));
        assert!(matches!(
            escalate(&at_district, &f.admin(UserRole::Sectoradmin), "again", later(2)),
            Err(LifecycleError::Authorization(_))
        ));
        // Ownership moved: the district admin now changes status, not the sector admin
        assert!(transition(
            &at_district,
            ComplaintStatus::InProgress,
            &f.admin(UserRole::Sectoradmin),
            None,
            later(3)
        )
        .is_err());
        assert_ok!(transition(
            &at_district,
            ComplaintStatus::InProgress,
            &f.admin(UserRole::Districtadmin),
            None,
            later(3)
        ));
    }

    #[test]
    fn test_resolved_complaint_cannot_be_escalated() {
        let f = Fixture::new();
        let resolved = assert_ok!(transition(
            &f.submitted(),
            ComplaintStatus::Resolved,
            &f.admin(UserRole::Sectoradmin),
            None,
            later(1)
        ));
        assert!(matches!(
            escalate(&resolved, &f.citizen(), "not happy", later(2)),
            Err(LifecycleError::InvariantViolation(_))
        ));
    }

    // -------------------------------------------------------------------------
    // add_comment
    // -------------------------------------------------------------------------

    #[test]
    fn test_identical_comments_are_not_deduplicated() {
        let f = Fixture::new();
        let author = CommentAuthor::for_actor(&f.citizen()).unwrap();
        let once = assert_ok!(add_comment(&f.submitted(), &author, "Any update?", vec![], later(1)));
        let twice = assert_ok!(add_comment(&once, &author, "Any update?", vec![], later(1)));

        assert_eq!(twice.comments.len(), 2);
        assert_ne!(twice.comments[0].id, twice.comments[1].id);
        assert_eq!(twice.comments[0].text, twice.comments[1].text);
        assert_eq!(twice.status, ComplaintStatus::Received);
    }

    #[test]
    fn test_comment_needs_text_or_attachment() {
        let f = Fixture::new();
        let author = CommentAuthor::for_actor(&f.admin(UserRole::Sectoradmin)).unwrap();
        let complaint = f.submitted();

        let err = assert_err!(add_comment(&complaint, &author, "  ", vec![" ".to_string()], later(1)));
        assert_eq!(validation_field(err), "text");

        let with_file = assert_ok!(add_comment(
            &complaint,
            &author,
            "",
            vec!["uploads/site-photo.jpg".to_string()],
            later(1)
        ));
        assert_eq!(with_file.comments[0].attachments, vec!["uploads/site-photo.jpg"]);
        assert_eq!(
            with_file.timeline.last().unwrap().actor_role,
            UserRole::Sectoradmin
        );
    }

    #[test]
    fn test_superadmin_has_no_comment_identity() {
        let f = Fixture::new();
        let superadmin = Actor {
            role: UserRole::Superadmin,
            ..f.admin(UserRole::Orgadmin)
        };
        assert_eq!(CommentAuthor::for_actor(&superadmin), None);
    }

    // -------------------------------------------------------------------------
    // routing and access
    // -------------------------------------------------------------------------

    #[test]
    fn test_check_routing_detects_inconsistent_rows() {
        let f = Fixture::new();
        let mut complaint = f.submitted();
        complaint.escalate_to_org = true;
        assert!(matches!(
            check_routing(&complaint),
            Err(LifecycleError::InvariantViolation(_))
        ));

        let mut complaint = f.submitted();
        complaint.escalation_level = EscalationLevel::District;
        complaint.escalate_to_district = true;
        complaint.escalation_reason = Some("manual edit".to_string());
        // sector still set
        assert!(check_routing(&complaint).is_err());
    }

    #[test]
    fn test_visibility() {
        let f = Fixture::new();
        let complaint = f.submitted();

        assert!(can_view(&f.citizen(), &complaint));
        assert!(can_view(&f.admin(UserRole::Sectoradmin), &complaint));
        assert!(can_view(&f.admin(UserRole::Districtadmin), &complaint));
        assert!(can_view(&f.admin(UserRole::Orgadmin), &complaint));
        let other_org = Actor {
            organization_id: Some(Uuid::new_v4()),
            ..f.admin(UserRole::Orgadmin)
        };
        assert!(!can_view(&other_org, &complaint));

        let escalated = assert_ok!(escalate(&complaint, &f.citizen(), "slow", later(1)));
        assert!(!can_view(&f.admin(UserRole::Sectoradmin), &escalated));
        assert!(can_view(&f.admin(UserRole::Districtadmin), &escalated));
    }

    #[test]
    fn test_admins_of_another_organization_are_refused() {
        let f = Fixture::new();
        let complaint = f.submitted();
        let foreign = |role| Actor {
            organization_id: Some(Uuid::new_v4()),
            ..f.admin(role)
        };

        // Same sector and district ids, different organization
        let sector_admin = foreign(UserRole::Sectoradmin);
        assert!(!can_view(&sector_admin, &complaint));
        let err = assert_err!(transition(
            &complaint,
            ComplaintStatus::Rejected,
            &sector_admin,
            Some("Not ours"),
            later(1)
        ));
        assert!(matches!(err, LifecycleError::Authorization(_)));

        let district_admin = foreign(UserRole::Districtadmin);
        assert!(!can_view(&district_admin, &complaint));
        let err = assert_err!(escalate(&complaint, &district_admin, "Taking over", later(1)));
        assert!(matches!(err, LifecycleError::Authorization(_)));

        let escalated = assert_ok!(escalate(&complaint, &f.citizen(), "No answer", later(2)));
        let err = assert_err!(transition(
            &escalated,
            ComplaintStatus::InProgress,
            &district_admin,
            None,
            later(3)
        ));
        assert!(matches!(err, LifecycleError::Authorization(_)));
    }
}
