use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::Tier;

/// Opaque invite token issued by the external onboarding workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteToken(String);

impl InviteToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InviteToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pending onboarding invite.
///
/// Consumption is one-shot: the first `create_from_invite` call materializes
/// the organization, replays fail with `AlreadyConsumed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingInvite {
    pub token: InviteToken,
    pub organization_name: String,
    pub contact_email: String,
    pub assigned_tier: Tier,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl OnboardingInvite {
    pub fn new(
        token: InviteToken,
        organization_name: impl Into<String>,
        contact_email: impl Into<String>,
        assigned_tier: Tier,
    ) -> Self {
        Self {
            token,
            organization_name: organization_name.into(),
            contact_email: contact_email.into(),
            assigned_tier,
            consumed_at: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}
