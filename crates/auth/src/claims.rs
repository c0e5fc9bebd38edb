use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{SubjectId, TenantId};

use crate::evaluate::{AuthzError, DenyReason};
use crate::principal::{Principal, Role};

/// Session claims model (transport-agnostic).
///
/// This is the minimal set of claims bursar expects once a token has been
/// decoded and signature-verified by whatever identity provider is in use.
/// Signature verification is intentionally outside this crate; the resolver's
/// contract is "reject absent or malformed claims".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject / principal identifier.
    pub sub: SubjectId,

    /// Tenant context for the session. Absent for platform-level principals.
    pub tenant_id: Option<TenantId>,

    /// Role granted within the tenant context (or platform-wide).
    pub role: Role,

    /// Whether the subject's identity has been verified (e.g. confirmed
    /// email). Unverified principals resolve but are denied by evaluation.
    pub verified: bool,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Resolve session claims into a [`Principal`].
///
/// Performed fresh on every request. Rejects with `NotAuthenticated` when:
/// - no claims are present,
/// - the validity window is inverted, not yet open, or expired,
/// - the tenant claim doesn't fit the role shape (platform admins carry no
///   tenant; tenant roles require one).
pub fn resolve_principal(
    claims: Option<&SessionClaims>,
    now: DateTime<Utc>,
) -> Result<Principal, AuthzError> {
    let claims = claims.ok_or_else(AuthzError::not_authenticated)?;

    if claims.expires_at <= claims.issued_at
        || now < claims.issued_at
        || now >= claims.expires_at
    {
        return Err(AuthzError::not_authenticated());
    }

    match (claims.role, claims.tenant_id) {
        (Role::PlatformAdmin, Some(_)) => Err(AuthzError::not_authenticated()),
        (Role::OrgAdmin | Role::OrgManager | Role::OrgStaff | Role::Student, None) => {
            Err(AuthzError::not_authenticated())
        }
        _ => Ok(Principal {
            subject_id: claims.sub,
            tenant_id: claims.tenant_id,
            role: claims.role,
            verified: claims.verified,
        }),
    }
}

impl AuthzError {
    fn not_authenticated() -> Self {
        Self::denied(DenyReason::NotAuthenticated)
    }
}
