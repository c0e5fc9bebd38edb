//! Tenant directory: the store behind onboarding, tier lookups and
//! membership.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use bursar_core::{SubjectId, TenantId, Tier};

use crate::invite::{InviteToken, OnboardingInvite};
use crate::organization::{OrgStatus, Organization};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error("unknown invite token")]
    UnknownInvite,

    /// Invite token replay: the organization was already created from it.
    #[error("invite already consumed")]
    AlreadyConsumed,

    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    #[error("unknown tenant")]
    UnknownTenant,

    #[error("student already enrolled")]
    AlreadyEnrolled,

    #[error("student not enrolled")]
    NotEnrolled,

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-side tenant lookup used by authorization context building and the
/// ledger engine's tenant checks.
pub trait TenantLookup: Send + Sync {
    fn organization(&self, id: TenantId) -> Option<Organization>;

    fn tier_of(&self, id: TenantId) -> Option<Tier> {
        self.organization(id).map(|org| org.tier())
    }
}

impl<T> TenantLookup for Arc<T>
where
    T: TenantLookup + ?Sized,
{
    fn organization(&self, id: TenantId) -> Option<Organization> {
        (**self).organization(id)
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    organizations: HashMap<TenantId, Organization>,
    invites: HashMap<InviteToken, OnboardingInvite>,
    memberships: HashMap<TenantId, HashSet<SubjectId>>,
}

/// In-memory tenant directory.
///
/// All mutations take the single write lock, so membership changes and the
/// `student_count` they maintain always commit together; there is no
/// separately-scheduled recount that could drift under concurrency.
#[derive(Debug, Default)]
pub struct TenantDirectory {
    inner: RwLock<DirectoryState>,
}

impl TenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an invite issued by the external onboarding workflow.
    pub fn register_invite(&self, invite: OnboardingInvite) -> Result<(), TenancyError> {
        let mut state = self.write()?;
        state.invites.insert(invite.token.clone(), invite);
        Ok(())
    }

    /// Consume an invite and create its organization.
    ///
    /// One-shot: replaying the same token fails with `AlreadyConsumed` and
    /// leaves the original organization untouched.
    pub fn create_from_invite(&self, token: &InviteToken) -> Result<Organization, TenancyError> {
        let mut state = self.write()?;

        let invite = state
            .invites
            .get(token)
            .ok_or(TenancyError::UnknownInvite)?;
        if invite.is_consumed() {
            return Err(TenancyError::AlreadyConsumed);
        }

        let now = Utc::now();
        let org = Organization::new(
            TenantId::new(),
            invite.organization_name.clone(),
            invite.contact_email.clone(),
            invite.assigned_tier,
            now,
        )
        .map_err(|e| TenancyError::InvalidInvite(e.to_string()))?;

        // The token is consumed only when creation succeeds.
        state
            .invites
            .get_mut(token)
            .expect("invite fetched above")
            .consumed_at = Some(now);

        let id = org.id_typed();
        state.organizations.insert(id, org.clone());
        state.memberships.insert(id, HashSet::new());

        info!(tenant = %id, tier = %org.tier(), "organization onboarded");
        Ok(org)
    }

    pub fn set_tier(&self, id: TenantId, tier: Tier) -> Result<(), TenancyError> {
        let mut state = self.write()?;
        let org = state
            .organizations
            .get_mut(&id)
            .ok_or(TenancyError::UnknownTenant)?;
        org.change_tier(tier);
        Ok(())
    }

    pub fn set_status(&self, id: TenantId, status: OrgStatus) -> Result<(), TenancyError> {
        let mut state = self.write()?;
        let org = state
            .organizations
            .get_mut(&id)
            .ok_or(TenancyError::UnknownTenant)?;
        match status {
            OrgStatus::Active => org.reactivate(),
            OrgStatus::Suspended => org.suspend(),
            OrgStatus::Inactive => {
                org.deactivate();
                Ok(())
            }
        }
        .map_err(|e| TenancyError::InvalidTransition(e.to_string()))
    }

    /// Enroll a student; increments `student_count` in the same write
    /// section as the membership insert.
    pub fn enroll_student(&self, id: TenantId, student: SubjectId) -> Result<u64, TenancyError> {
        let mut state = self.write()?;
        if !state.organizations.contains_key(&id) {
            return Err(TenancyError::UnknownTenant);
        }
        let members = state.memberships.entry(id).or_default();
        if !members.insert(student) {
            return Err(TenancyError::AlreadyEnrolled);
        }
        let org = state
            .organizations
            .get_mut(&id)
            .expect("organization checked above");
        org.increment_students();
        Ok(org.student_count())
    }

    /// Withdraw a student; decrements the counter with the membership remove.
    pub fn withdraw_student(&self, id: TenantId, student: SubjectId) -> Result<u64, TenancyError> {
        let mut state = self.write()?;
        let members = state
            .memberships
            .get_mut(&id)
            .ok_or(TenancyError::UnknownTenant)?;
        if !members.remove(&student) {
            return Err(TenancyError::NotEnrolled);
        }
        let org = state
            .organizations
            .get_mut(&id)
            .ok_or(TenancyError::UnknownTenant)?;
        org.decrement_students();
        Ok(org.student_count())
    }

    pub fn is_enrolled(&self, id: TenantId, student: SubjectId) -> bool {
        self.inner
            .read()
            .map(|s| {
                s.memberships
                    .get(&id)
                    .is_some_and(|members| members.contains(&student))
            })
            .unwrap_or(false)
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, DirectoryState>, TenancyError> {
        self.inner
            .write()
            .map_err(|_| TenancyError::Unavailable("lock poisoned".to_string()))
    }
}

impl TenantLookup for TenantDirectory {
    fn organization(&self, id: TenantId) -> Option<Organization> {
        self.inner
            .read()
            .ok()
            .and_then(|s| s.organizations.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn directory_with_org() -> (TenantDirectory, TenantId) {
        let directory = TenantDirectory::new();
        let token = InviteToken::new("invite-1");
        directory
            .register_invite(OnboardingInvite::new(
                token.clone(),
                "Del Pilar Academy",
                "bursar@dpa.edu.ph",
                Tier::Plus,
            ))
            .unwrap();
        let org = directory.create_from_invite(&token).unwrap();
        (directory, org.id_typed())
    }

    #[test]
    fn invite_consumption_is_idempotent_against_replay() {
        let (directory, _) = directory_with_org();
        let err = directory
            .create_from_invite(&InviteToken::new("invite-1"))
            .unwrap_err();
        assert_eq!(err, TenancyError::AlreadyConsumed);
    }

    #[test]
    fn unknown_invite_is_rejected() {
        let directory = TenantDirectory::new();
        let err = directory
            .create_from_invite(&InviteToken::new("nope"))
            .unwrap_err();
        assert_eq!(err, TenancyError::UnknownInvite);
    }

    #[test]
    fn onboarded_organization_carries_assigned_tier() {
        let (directory, tenant) = directory_with_org();
        assert_eq!(directory.tier_of(tenant), Some(Tier::Plus));
    }

    #[test]
    fn enrollment_maintains_student_count() {
        let (directory, tenant) = directory_with_org();
        let student = SubjectId::new();

        assert_eq!(directory.enroll_student(tenant, student).unwrap(), 1);
        assert_eq!(
            directory.enroll_student(tenant, student).unwrap_err(),
            TenancyError::AlreadyEnrolled
        );
        assert_eq!(directory.withdraw_student(tenant, student).unwrap(), 0);
        assert_eq!(
            directory.withdraw_student(tenant, student).unwrap_err(),
            TenancyError::NotEnrolled
        );
    }

    #[test]
    fn concurrent_enrollment_never_loses_counter_updates() {
        let (directory, tenant) = directory_with_org();
        let directory = Arc::new(directory);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        directory.enroll_student(tenant, SubjectId::new()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let org = directory.organization(tenant).unwrap();
        assert_eq!(org.student_count(), 400);
    }

    #[test]
    fn suspended_org_is_looked_up_but_cannot_transact() {
        let (directory, tenant) = directory_with_org();
        directory.set_status(tenant, OrgStatus::Suspended).unwrap();
        let org = directory.organization(tenant).unwrap();
        assert!(!org.can_transact());
    }
}
