//! Data models for the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// Enums
// =============================================================================

/// Complaint status. The snake_case names are the wire vocabulary shared
/// with every API consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Received,
    InProgress,
    NeedsInfo,
    Resolved,
    Rejected,
    Escalated,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 6] = [
        ComplaintStatus::Received,
        ComplaintStatus::InProgress,
        ComplaintStatus::NeedsInfo,
        ComplaintStatus::Resolved,
        ComplaintStatus::Rejected,
        ComplaintStatus::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Received => "received",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::NeedsInfo => "needs_info",
            ComplaintStatus::Resolved => "resolved",
            ComplaintStatus::Rejected => "rejected",
            ComplaintStatus::Escalated => "escalated",
        }
    }

    /// Resolved and rejected complaints accept no further status changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ComplaintStatus::Resolved | ComplaintStatus::Rejected)
    }

    /// Statuses that must be accompanied by a message to the citizen.
    pub fn requires_comment(&self) -> bool {
        matches!(self, ComplaintStatus::Rejected | ComplaintStatus::NeedsInfo)
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative tier that owns a complaint. Ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "escalation_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Sector,
    District,
    Organization,
}

impl EscalationLevel {
    /// The tier directly above this one, if any.
    pub fn next(&self) -> Option<EscalationLevel> {
        match self {
            EscalationLevel::Sector => Some(EscalationLevel::District),
            EscalationLevel::District => Some(EscalationLevel::Organization),
            EscalationLevel::Organization => None,
        }
    }

    /// Escalation flags `(escalate_to_district, escalate_to_org)` implied by the level.
    pub fn flags(&self) -> (bool, bool) {
        match self {
            EscalationLevel::Sector => (false, false),
            EscalationLevel::District => (true, false),
            EscalationLevel::Organization => (false, true),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationLevel::Sector => "sector",
            EscalationLevel::District => "district",
            EscalationLevel::Organization => "organization",
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Superadmin,
    Orgadmin,
    Districtadmin,
    Sectoradmin,
    Citizen,
}

impl UserRole {
    /// Tier administered by this role. Citizens and the superadmin have none.
    pub fn tier(&self) -> Option<EscalationLevel> {
        match self {
            UserRole::Orgadmin => Some(EscalationLevel::Organization),
            UserRole::Districtadmin => Some(EscalationLevel::District),
            UserRole::Sectoradmin => Some(EscalationLevel::Sector),
            UserRole::Superadmin | UserRole::Citizen => None,
        }
    }

    /// Role recorded on comments and escalation records.
    pub fn comment_role(&self) -> Option<CommentRole> {
        match self {
            UserRole::Citizen => Some(CommentRole::Citizen),
            UserRole::Sectoradmin => Some(CommentRole::SectorAdmin),
            UserRole::Districtadmin => Some(CommentRole::DistrictAdmin),
            UserRole::Orgadmin => Some(CommentRole::OrgAdmin),
            UserRole::Superadmin => None,
        }
    }

    /// The role an administrator of this role may provision, if any.
    pub fn provisions(&self) -> Option<UserRole> {
        match self {
            UserRole::Superadmin => Some(UserRole::Orgadmin),
            UserRole::Orgadmin => Some(UserRole::Districtadmin),
            UserRole::Districtadmin => Some(UserRole::Sectoradmin),
            UserRole::Sectoradmin | UserRole::Citizen => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "comment_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommentRole {
    Citizen,
    SectorAdmin,
    DistrictAdmin,
    OrgAdmin,
}

impl CommentRole {
    pub fn user_role(&self) -> UserRole {
        match self {
            CommentRole::Citizen => UserRole::Citizen,
            CommentRole::SectorAdmin => UserRole::Sectoradmin,
            CommentRole::DistrictAdmin => UserRole::Districtadmin,
            CommentRole::OrgAdmin => UserRole::Orgadmin,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "complaint_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attachment_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// The citizen's identity document
    Identity,
    Supporting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "timeline_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    Submitted,
    StatusChanged,
    Escalated,
    Commented,
}

// =============================================================================
// Complaint
// =============================================================================

/// A complaint together with its ordered child records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub description: String,
    pub service: String,
    pub priority: ComplaintPriority,
    pub citizen_id: Uuid,
    pub organization_id: Uuid,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub status: ComplaintStatus,
    pub escalation_level: EscalationLevel,
    pub escalate_to_district: bool,
    pub escalate_to_org: bool,
    pub escalation_reason: Option<String>,
    pub attachments: Vec<Attachment>,
    pub comments: Vec<Comment>,
    pub escalations: Vec<EscalationDetail>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub version: i64,
}

/// Flat `complaints` table row
#[derive(Debug, Clone, FromRow)]
pub struct ComplaintRow {
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub description: String,
    pub service: String,
    pub priority: ComplaintPriority,
    pub citizen_id: Uuid,
    pub organization_id: Uuid,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub status: ComplaintStatus,
    pub escalation_level: EscalationLevel,
    pub escalate_to_district: bool,
    pub escalate_to_org: bool,
    pub escalation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub version: i64,
}

impl ComplaintRow {
    pub fn into_complaint(
        self,
        attachments: Vec<Attachment>,
        comments: Vec<Comment>,
        escalations: Vec<EscalationDetail>,
        timeline: Vec<TimelineEntry>,
    ) -> Complaint {
        Complaint {
            id: self.id,
            reference: self.reference,
            title: self.title,
            description: self.description,
            service: self.service,
            priority: self.priority,
            citizen_id: self.citizen_id,
            organization_id: self.organization_id,
            district_id: self.district_id,
            sector_id: self.sector_id,
            status: self.status,
            escalation_level: self.escalation_level,
            escalate_to_district: self.escalate_to_district,
            escalate_to_org: self.escalate_to_org,
            escalation_reason: self.escalation_reason,
            attachments,
            comments,
            escalations,
            timeline,
            created_at: self.created_at,
            updated_at: self.updated_at,
            due_date: self.due_date,
            resolved_at: self.resolved_at,
            resolution: self.resolution,
            version: self.version,
        }
    }
}

/// Short listing entry used by the queue and citizen views
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintSummary {
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub service: String,
    pub priority: ComplaintPriority,
    pub status: ComplaintStatus,
    pub escalation_level: EscalationLevel,
    pub organization_id: Uuid,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub kind: AttachmentKind,
    pub name: String,
    #[serde(skip_serializing)]
    pub storage_path: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub text: String,
    pub author_id: Uuid,
    pub author_role: CommentRole,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EscalationDetail {
    pub id: Uuid,
    pub from_level: EscalationLevel,
    pub to_level: EscalationLevel,
    pub reason: String,
    pub requested_by: Uuid,
    pub requested_by_role: CommentRole,
    pub original_district_id: Option<Uuid>,
    pub original_sector_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub id: Uuid,
    pub action: TimelineAction,
    pub actor_id: Uuid,
    pub actor_role: UserRole,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Complaint requests
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ComplaintStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalateRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddCommentRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListComplaintsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<ComplaintStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_level: HashMap<String, i64>,
    pub overdue: i64,
    /// Percentage of complaints in scope that are resolved
    pub resolution_rate: i64,
}

// =============================================================================
// User
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            organization_id: user.organization_id,
            district_id: user.district_id,
            sector_id: user.sector_id,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

/// Administrator provisioning request. The role is implied by the caller's role.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdminRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    pub organization_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

// =============================================================================
// Organization
// =============================================================================

/// A service provider. Complaints and administrator accounts belong to one.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

// =============================================================================
// API Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_levels_are_ordered() {
        assert!(EscalationLevel::Sector < EscalationLevel::District);
        assert!(EscalationLevel::District < EscalationLevel::Organization);
        assert_eq!(EscalationLevel::Sector.next(), Some(EscalationLevel::District));
        assert_eq!(EscalationLevel::Organization.next(), None);
    }

    #[test]
    fn test_level_flags_match_routing_rule() {
        assert_eq!(EscalationLevel::Sector.flags(), (false, false));
        assert_eq!(EscalationLevel::District.flags(), (true, false));
        assert_eq!(EscalationLevel::Organization.flags(), (false, true));
    }

    #[test]
    fn test_status_wire_names() {
        let names: Vec<String> = ComplaintStatus::ALL
            .iter()
            .map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["received", "in_progress", "needs_info", "resolved", "rejected", "escalated"]
        );
        for status in ComplaintStatus::ALL {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
        }
    }

    #[test]
    fn test_role_tiers() {
        assert_eq!(UserRole::Sectoradmin.tier(), Some(EscalationLevel::Sector));
        assert_eq!(UserRole::Orgadmin.tier(), Some(EscalationLevel::Organization));
        assert_eq!(UserRole::Citizen.tier(), None);
        assert_eq!(UserRole::Superadmin.comment_role(), None);
        assert_eq!(
            serde_json::to_value(UserRole::Districtadmin).unwrap(),
            "districtadmin"
        );
    }

    #[test]
    fn test_comment_role_wire_names() {
        assert_eq!(
            serde_json::to_value(CommentRole::SectorAdmin).unwrap(),
            "sector_admin"
        );
        assert_eq!(serde_json::to_value(CommentRole::OrgAdmin).unwrap(), "org_admin");
    }

    #[test]
    fn test_register_request_validation() {
        let valid = RegisterRequest {
            first_name: "Aline".to_string(),
            last_name: "Uwase".to_string(),
            email: "aline@example.rw".to_string(),
            phone: Some("+250788000000".to_string()),
            password: "correct-horse".to_string(),
        };
        assert!(valid.validate().is_ok());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            ..valid.clone()
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest {
            password: "short".to_string(),
            ..valid
        };
        assert!(short_password.validate().is_err());
    }

    #[test]
    fn test_organization_request_validation() {
        let valid = CreateOrganizationRequest {
            name: "Water and Sanitation".to_string(),
            description: None,
        };
        assert!(valid.validate().is_ok());

        let unnamed = CreateOrganizationRequest {
            name: String::new(),
            ..valid
        };
        assert!(unnamed.validate().is_err());
    }
}
