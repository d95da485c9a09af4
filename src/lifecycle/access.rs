//! Who may see and act on a complaint

use super::LifecycleError;
use crate::models::{Complaint, User, UserRole};
use uuid::Uuid;

/// The authenticated user performing an operation, reduced to what the
/// access rules need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub district_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            organization_id: user.organization_id,
            district_id: user.district_id,
            sector_id: user.sector_id,
        }
    }
}

/// Whether the administrator belongs to the complaint's organization and
/// their sector or district contains the complaint's current location.
fn jurisdiction_covers(actor: &Actor, complaint: &Complaint) -> bool {
    if actor.organization_id != Some(complaint.organization_id) {
        return false;
    }
    match actor.role {
        UserRole::Sectoradmin => actor.sector_id.is_some() && actor.sector_id == complaint.sector_id,
        UserRole::Districtadmin => {
            actor.district_id.is_some() && actor.district_id == complaint.district_id
        }
        UserRole::Orgadmin => true,
        UserRole::Superadmin | UserRole::Citizen => false,
    }
}

/// Read access: the submitting citizen, the superadmin, or any administrator
/// whose jurisdiction contains the complaint.
pub fn can_view(actor: &Actor, complaint: &Complaint) -> bool {
    match actor.role {
        UserRole::Superadmin => true,
        UserRole::Citizen => complaint.citizen_id == actor.user_id,
        UserRole::Orgadmin | UserRole::Districtadmin | UserRole::Sectoradmin => {
            jurisdiction_covers(actor, complaint)
        }
    }
}

/// Status changes belong to the owning tier only.
pub fn authorize_status_change(actor: &Actor, complaint: &Complaint) -> Result<(), LifecycleError> {
    let tier = actor.role.tier().ok_or_else(|| {
        LifecycleError::Authorization("only administrators may change a complaint's status".into())
    })?;

    if tier != complaint.escalation_level {
        return Err(LifecycleError::Authorization(format!(
            "complaint is owned by the {} tier, not the {} tier",
            complaint.escalation_level, tier
        )));
    }
    if !jurisdiction_covers(actor, complaint) {
        return Err(LifecycleError::Authorization(
            "complaint is outside the administrator's jurisdiction".into(),
        ));
    }
    Ok(())
}

/// Escalation may be requested by the submitting citizen, or by an
/// administrator at or above the owning tier whose jurisdiction contains
/// the complaint.
pub fn authorize_escalation(actor: &Actor, complaint: &Complaint) -> Result<(), LifecycleError> {
    let allowed = match actor.role.tier() {
        None => actor.role == UserRole::Citizen && complaint.citizen_id == actor.user_id,
        Some(tier) => tier >= complaint.escalation_level && jurisdiction_covers(actor, complaint),
    };

    if allowed {
        Ok(())
    } else {
        Err(LifecycleError::Authorization(format!(
            "not allowed to escalate a complaint owned by the {} tier",
            complaint.escalation_level
        )))
    }
}
