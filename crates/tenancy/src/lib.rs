//! `bursar-tenancy` — tenant organizations, onboarding and membership.
//!
//! Holds the organization records (tier, status, lifecycle) that tier-gating
//! policies read, the idempotent invite-consumption onboarding path, and
//! student membership with its counter maintained atomically alongside the
//! membership write.

pub mod directory;
pub mod invite;
pub mod organization;

pub use directory::{TenantDirectory, TenantLookup, TenancyError};
pub use invite::{InviteToken, OnboardingInvite};
pub use organization::{OrgStatus, Organization};
