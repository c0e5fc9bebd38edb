use serde::{Deserialize, Serialize};

use bursar_core::{SubjectId, TenantId};

/// Role resolved from session claims.
///
/// Officer roles form a hierarchy (`OrgStaff < OrgManager < OrgAdmin`);
/// `PlatformAdmin` is cross-tenant and carries no tenant membership;
/// `Student` is scoped by record ownership rather than role rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PlatformAdmin,
    OrgAdmin,
    OrgManager,
    OrgStaff,
    Student,
    None,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "platform_admin",
            Role::OrgAdmin => "org_admin",
            Role::OrgManager => "org_manager",
            Role::OrgStaff => "org_staff",
            Role::Student => "student",
            Role::None => "none",
        }
    }

    /// Rank within the officer hierarchy; non-officer roles have none.
    pub fn officer_rank(&self) -> Option<u8> {
        match self {
            Role::OrgAdmin => Some(3),
            Role::OrgManager => Some(2),
            Role::OrgStaff => Some(1),
            _ => None,
        }
    }

    pub fn is_officer(&self) -> bool {
        self.officer_rank().is_some()
    }

    /// Whether this role sits at or above `min` in the officer hierarchy.
    pub fn at_least(&self, min: Role) -> bool {
        match (self.officer_rank(), min.officer_rank()) {
            (Some(mine), Some(required)) => mine >= required,
            _ => false,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved principal for authorization decisions.
///
/// Derived fresh from session claims on every request, never cached across
/// requests. `tenant_id` is `None` only for platform-level principals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: SubjectId,
    pub tenant_id: Option<TenantId>,
    pub role: Role,
    pub verified: bool,
}

impl Principal {
    pub fn platform_admin(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            tenant_id: None,
            role: Role::PlatformAdmin,
            verified: true,
        }
    }

    pub fn officer(subject_id: SubjectId, tenant_id: TenantId, role: Role) -> Self {
        debug_assert!(role.is_officer());
        Self {
            subject_id,
            tenant_id: Some(tenant_id),
            role,
            verified: true,
        }
    }

    pub fn student(subject_id: SubjectId, tenant_id: TenantId) -> Self {
        Self {
            subject_id,
            tenant_id: Some(tenant_id),
            role: Role::Student,
            verified: true,
        }
    }

    /// Whether this principal's tenant claim matches the resource's tenant.
    ///
    /// Client-supplied tenant identifiers are never consulted here; only the
    /// verified claim on the principal is compared.
    pub fn in_tenant(&self, tenant_id: Option<TenantId>) -> bool {
        match (self.tenant_id, tenant_id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }
}
