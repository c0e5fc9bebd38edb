//! Audit entry model (immutable facts).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bursar_core::{SubjectId, TenantId};

/// Unique audit entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of change (or privileged access) an entry documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An entity was created.
    Created,
    /// An entity was updated without a lifecycle decision (e.g. a payment's
    /// allocations).
    Updated,
    /// A pending entity was decided (payment verified/rejected, waiver
    /// granted/rejected).
    Decided,
    /// A sticky override was applied (waived, appealed, clearance override).
    Overridden,
    /// A sticky override was removed, restoring derived truth.
    OverrideCleared,
    /// A cross-tenant read of subject data under a logged justification.
    PrivilegedRead,
}

/// Immutable, append-only audit record.
///
/// `before`/`after` are JSON snapshots of the documented entity; either may be
/// absent (creation has no `before`, a privileged read mutates nothing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub entity_kind: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub performed_by: SubjectId,
    /// Absent for platform-level actions not scoped to a tenant.
    pub tenant_id: Option<TenantId>,
    /// Mandatory for `PrivilegedRead`; absent otherwise.
    pub access_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_kind: impl Into<String>,
        entity_id: impl ToString,
        action: AuditAction,
        performed_by: SubjectId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            entity_kind: entity_kind.into(),
            entity_id: entity_id.to_string(),
            action,
            before: None,
            after: None,
            performed_by,
            tenant_id: None,
            access_reason: None,
            occurred_at,
        }
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_before(mut self, snapshot: JsonValue) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn with_after(mut self, snapshot: JsonValue) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn with_access_reason(mut self, reason: impl Into<String>) -> Self {
        self.access_reason = Some(reason.into());
        self
    }
}
