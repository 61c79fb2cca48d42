//! Pure access decisions. Nothing here performs I/O, so every check can be
//! re-run at commit time against freshly fetched snapshots.

use shared::domain::{MemberSnapshot, PanelConfig, RoleId, RoleSnapshot};
use thiserror::Error;

use crate::presentation::offered_role_ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HierarchyViolation {
    #[error("That role is managed/integration-based and can't be used.")]
    ManagedRole,
    #[error("You can't use @everyone.")]
    EveryoneRole,
    #[error("That role is equal to or above your highest role.")]
    NotBelowOperator,
    #[error("That role is equal to or above my highest role, so I can't manage it.")]
    NotBelowSystem,
}

/// Whether `operator` may use `panel` at all.
pub fn can_operate(operator: &MemberSnapshot, panel: &PanelConfig) -> bool {
    if operator.guild_id != panel.guild_id {
        return false;
    }
    let staff_ok = panel.staff_role_ids.is_empty()
        || panel
            .staff_role_ids
            .iter()
            .any(|role_id| operator.holds(*role_id));
    let elevation_ok = !panel.requires_elevated_permission || operator.can_manage_roles;
    staff_ok && elevation_ok
}

/// Only roles the picker actually offers can be selected or committed.
pub fn role_is_assignable(panel: &PanelConfig, role_id: RoleId) -> bool {
    offered_role_ids(panel).contains(&role_id)
}

/// Rejects roles nobody may hand out through a panel, regardless of who asks.
pub fn validate_panel_role(role: &RoleSnapshot) -> Result<(), HierarchyViolation> {
    if role.managed {
        return Err(HierarchyViolation::ManagedRole);
    }
    if role.is_everyone {
        return Err(HierarchyViolation::EveryoneRole);
    }
    Ok(())
}

/// Role must sit strictly below both the operator and the acting system.
pub fn hierarchy_ok(
    system: &MemberSnapshot,
    operator: &MemberSnapshot,
    role: &RoleSnapshot,
) -> Result<(), HierarchyViolation> {
    validate_panel_role(role)?;
    if role.rank >= operator.highest_rank {
        return Err(HierarchyViolation::NotBelowOperator);
    }
    if role.rank >= system.highest_rank {
        return Err(HierarchyViolation::NotBelowSystem);
    }
    Ok(())
}

/// Panel management is reserved for members who can manage the guild itself.
pub fn can_manage_panels(member: &MemberSnapshot) -> bool {
    member.is_owner || member.can_manage_guild
}

#[cfg(test)]
#[path = "tests/access_tests.rs"]
mod tests;
