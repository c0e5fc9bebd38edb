use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{DomainError, DomainResult, Entity, TenantId, Tier};

/// Organization status lifecycle.
///
/// Organizations are never hard-deleted; leaving the platform is a
/// transition to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgStatus {
    Active,
    Suspended,
    Inactive,
}

/// A tenant organization (a school on the platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    id: TenantId,
    name: String,
    contact_email: String,
    tier: Tier,
    status: OrgStatus,
    /// Maintained exclusively by membership mutations in the directory;
    /// never written directly by request handlers.
    student_count: u64,
    created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(
        id: TenantId,
        name: impl Into<String>,
        contact_email: impl Into<String>,
        tier: Tier,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("organization name must not be empty"));
        }
        Ok(Self {
            id,
            name,
            contact_email: contact_email.into(),
            tier,
            status: OrgStatus::Active,
            student_count: 0,
            created_at,
        })
    }

    pub fn id_typed(&self) -> TenantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact_email(&self) -> &str {
        &self.contact_email
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn status(&self) -> OrgStatus {
        self.status
    }

    pub fn student_count(&self) -> u64 {
        self.student_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Invariant helper: only active organizations may transact.
    pub fn can_transact(&self) -> bool {
        self.status == OrgStatus::Active
    }

    pub fn change_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    pub fn suspend(&mut self) -> DomainResult<()> {
        match self.status {
            OrgStatus::Active => {
                self.status = OrgStatus::Suspended;
                Ok(())
            }
            OrgStatus::Suspended => Ok(()),
            OrgStatus::Inactive => Err(DomainError::invariant(
                "cannot suspend an inactive organization",
            )),
        }
    }

    pub fn reactivate(&mut self) -> DomainResult<()> {
        match self.status {
            OrgStatus::Suspended => {
                self.status = OrgStatus::Active;
                Ok(())
            }
            OrgStatus::Active => Ok(()),
            OrgStatus::Inactive => Err(DomainError::invariant(
                "inactive organizations cannot be reactivated",
            )),
        }
    }

    /// Terminal transition; replaces hard deletion.
    pub fn deactivate(&mut self) {
        self.status = OrgStatus::Inactive;
    }

    pub(crate) fn increment_students(&mut self) {
        self.student_count += 1;
    }

    pub(crate) fn decrement_students(&mut self) {
        self.student_count = self.student_count.saturating_sub(1);
    }
}

impl Entity for Organization {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> Organization {
        Organization::new(
            TenantId::new(),
            "San Isidro National High School",
            "registrar@sinhs.edu.ph",
            Tier::Basic,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn new_organization_is_active_with_no_students() {
        let org = org();
        assert_eq!(org.status(), OrgStatus::Active);
        assert_eq!(org.student_count(), 0);
        assert!(org.can_transact());
    }

    #[test]
    fn empty_name_is_rejected() {
        let result = Organization::new(TenantId::new(), "  ", "a@b.c", Tier::Basic, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn suspended_organization_cannot_transact_and_can_reactivate() {
        let mut org = org();
        org.suspend().unwrap();
        assert!(!org.can_transact());
        org.reactivate().unwrap();
        assert!(org.can_transact());
    }

    #[test]
    fn deactivation_is_terminal() {
        let mut org = org();
        org.deactivate();
        assert_eq!(org.status(), OrgStatus::Inactive);
        assert!(org.reactivate().is_err());
        assert!(org.suspend().is_err());
    }
}
